use std::env;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};

pub mod cipher;
pub mod codec;
pub mod error;
pub mod formatting;
pub mod keystore;
pub mod migrate;
pub mod note;
pub mod storage;
pub mod store;

use formatting::FormatContext;
use note::{Category, Note};
use storage::FileStore;
use store::NoteStore;

pub fn entry() -> Result<(), Box<dyn Error>> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_help();
        return Ok(());
    }

    let cmd = args.remove(0);
    let dir = notes_dir()?;

    // Commands that never touch the store.
    match cmd.as_str() {
        "path" => {
            println!("{}", dir.display());
            return Ok(());
        }
        "help" => {
            print_help();
            return Ok(());
        }
        _ => {}
    }

    let mut store = NoteStore::open(FileStore::open(&dir)?)?;

    match cmd.as_str() {
        "add" => add_note(args, &mut store)?,
        "list" => list_notes(args, &mut store)?,
        "view" => view_note(args, &mut store, false)?,
        "render" => view_note(args, &mut store, true)?,
        "edit" => edit_note(args, &mut store)?,
        "delete" => delete_notes(args, &mut store)?,
        "delete-all" => delete_all_notes(&mut store)?,
        "categories" => list_categories(&mut store)?,
        "rotate-key" => rotate_key(&mut store)?,
        "export" => export_notes(args, &mut store)?,
        "import" => import_notes(args, &mut store)?,
        "seed" => seed_notes(args, &mut store)?,
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        "\
Snip Notes CLI (encrypted at rest)
Usage:
  sn add \"text\" [-c <category>] [--from <url>]
                                  Save a snippet (URLs auto-file under url)
  sn list [-s|--search <text>] [-c <category>] [--asc] [--plain]
                                  List notes, newest first
  sn view <id> [--render|-r] [--plain]
                                  Show a note (render markdown with --render)
  sn render <id>                  Same as: sn view <id> --render
  sn edit <id> [new text...] [-c <category>]
                                  Replace a note's text and/or category
  sn delete <ids...>              Delete one or more notes
  sn delete-all                   Delete every note
  sn categories                   List categories with counts and first/last use
  sn rotate-key                   Rotate the encryption key, re-encrypting all notes
  sn export <file>                Write the encrypted collection to a backup file
  sn import <file>                Merge a backup file (existing ids are kept)
  sn seed <count> [--chars N] [-c <category>]
                                  Generate test notes (default 400 chars each)
  sn path                         Show the notes directory
  sn help                         Show this message

Environment:
  SNIP_NOTES_DIR                  Override notes directory (default: ~/.snip_notes)
  SNIP_NOTES_DEFAULT_CATEGORY     Category used when none is given
  SNIP_NOTES_CATEGORIES           Extra categories to pin in `categories`
"
    );
}

fn notes_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = env::var("SNIP_NOTES_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = env::var("HOME").map_err(|_| {
        io::Error::other("HOME not set; set SNIP_NOTES_DIR explicitly")
    })?;
    Ok(PathBuf::from(home).join(".snip_notes"))
}

fn add_note(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let mut category: Option<Category> = None;
    let mut source: Option<String> = None;
    let mut body_parts: Vec<String> = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--category" => {
                let v = iter
                    .next()
                    .ok_or("Provide a category after -c/--category")?;
                category = Some(Category::parse(&v));
            }
            "--from" => {
                let v = iter.next().ok_or("Provide a URL after --from")?;
                source = Some(v);
            }
            _ => body_parts.push(arg),
        }
    }
    if body_parts.is_empty() {
        return Err("Provide the note text, e.g. `sn add \"text\"`".into());
    }
    let text = body_parts.join(" ");
    let category = category.unwrap_or_else(|| {
        if note::looks_like_url(&text) {
            Category::Url
        } else {
            note::default_category()
        }
    });

    let saved = store.save(&text, category, source)?;
    println!("Added note {} [{}]", saved.id, saved.category);
    Ok(())
}

fn list_notes(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let mut search: Option<String> = None;
    let mut category: Option<Category> = None;
    let mut ascending = false;
    let mut plain = false;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-s" | "--search" => {
                let v = iter
                    .next()
                    .ok_or("Provide a search string after -s/--search")?;
                search = Some(v);
            }
            "-c" | "--category" => {
                let v = iter
                    .next()
                    .ok_or("Provide a category after -c/--category")?;
                category = Some(Category::parse(&v));
            }
            "--asc" => ascending = true,
            "--desc" => ascending = false,
            "--plain" => plain = true,
            other => {
                return Err(format!("Unknown flag for list: {other}").into());
            }
        }
    }

    let outcome = store.load_all()?;
    let ctx = if plain {
        FormatContext::new(false)
    } else {
        FormatContext::from_env()
    };

    let mut rows: Vec<(Note, String)> = Vec::new();
    for n in outcome.notes {
        if let Some(wanted) = &category {
            if &n.category != wanted {
                continue;
            }
        }
        let text = match store.decrypt_note(&n) {
            Ok(text) => text,
            Err(_) => {
                if search.is_none() {
                    rows.push((n, "[unrecoverable note]".to_string()));
                }
                continue;
            }
        };
        if let Some(q) = &search {
            if !text.to_lowercase().contains(&q.to_lowercase()) {
                continue;
            }
        }
        rows.push((n, text));
    }
    if ascending {
        rows.reverse();
    }

    if rows.is_empty() {
        println!("No notes yet. Try `sn add \"text\"`.");
        return Ok(());
    }

    for (n, text) in rows {
        let preview = ctx.highlight_match(
            &formatting::preview_line(&text),
            search.as_deref(),
        );
        println!(
            "{} {} {} {}",
            ctx.format_id(n.id),
            ctx.format_timestamp(&n.timestamp),
            ctx.format_category(&n.category),
            preview
        );
    }
    if outcome.dropped > 0 {
        eprintln!("Skipped {} unreadable record(s).", outcome.dropped);
    }
    if !outcome.unrecoverable.is_empty() {
        eprintln!(
            "{} note(s) cannot be decrypted with the current key.",
            outcome.unrecoverable.len()
        );
    }
    Ok(())
}

fn parse_note_id(raw: &str) -> Result<i64, Box<dyn Error>> {
    raw.parse().map_err(|_| format!("Invalid note id: {raw}").into())
}

fn view_note(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
    force_render: bool,
) -> Result<(), Box<dyn Error>> {
    let mut id: Option<i64> = None;
    let mut render = force_render;
    let mut plain = false;
    for arg in args {
        match arg.as_str() {
            "--render" | "-r" | "render" => render = true,
            "--plain" => plain = true,
            other => {
                if other.starts_with('-') {
                    return Err(
                        format!("Unknown flag for view: {other}").into()
                    );
                }
                if id.is_none() {
                    id = Some(parse_note_id(other)?);
                }
            }
        }
    }
    let id = id.ok_or("Usage: sn view <id> [--render|-r] [--plain]")?;
    let ctx = if plain {
        FormatContext::new(false)
    } else {
        FormatContext::from_env()
    };

    let outcome = store.load_all()?;
    let note = outcome
        .notes
        .iter()
        .find(|n| n.id == id)
        .ok_or_else(|| format!("Note {id} not found"))?;
    let text = store.decrypt_note(note).map_err(|_| {
        format!("Note {id} cannot be decrypted with the current key")
    })?;

    let header = format!("# {} note {}", note.category, note.id);
    println!("{}", ctx.format_header(&header));
    println!("Saved: {}", ctx.format_timestamp(&note.timestamp));
    if let Some(source) = &note.source {
        println!("Source: {source}");
    }
    println!();
    if render {
        println!("{}", formatting::render_markdown(&text, &ctx));
    } else {
        println!("{text}");
    }
    Ok(())
}

fn edit_note(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let mut id: Option<i64> = None;
    let mut category: Option<Category> = None;
    let mut text_parts: Vec<String> = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--category" => {
                let v = iter
                    .next()
                    .ok_or("Provide a category after -c/--category")?;
                category = Some(Category::parse(&v));
            }
            other => {
                if id.is_none() {
                    id = Some(parse_note_id(other)?);
                } else {
                    text_parts.push(other.to_string());
                }
            }
        }
    }
    let id = id.ok_or("Usage: sn edit <id> [new text...] [-c <category>]")?;
    if text_parts.is_empty() && category.is_none() {
        return Err("Provide new text and/or -c <category>".into());
    }
    let text = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(" "))
    };

    let updated = store.update(id, text.as_deref(), category)?;
    println!("Updated {} [{}]", updated.id, updated.category);
    Ok(())
}

fn delete_notes(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        return Err("Usage: sn delete <ids...>".into());
    }
    let mut deleted = 0;
    for raw in args {
        let id = parse_note_id(&raw)?;
        match store.delete(id) {
            Ok(()) => {
                println!("Deleted {id}");
                deleted += 1;
            }
            Err(error::StoreError::NotFound { .. }) => {
                println!("Note {id} not found");
            }
            Err(err) => return Err(err.into()),
        }
    }
    if deleted == 0 {
        println!("No notes deleted.");
    }
    Ok(())
}

fn delete_all_notes(
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let count = store.delete_all()?;
    if count == 0 {
        println!("No notes to delete.");
    } else {
        println!("Deleted {count} note(s).");
    }
    Ok(())
}

fn list_categories(
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    use chrono::{DateTime, FixedOffset};

    #[derive(Default, Clone)]
    struct CategoryStat {
        count: usize,
        first: Option<DateTime<FixedOffset>>,
        last: Option<DateTime<FixedOffset>>,
    }

    let outcome = store.load_all()?;
    let mut stats: std::collections::BTreeMap<String, CategoryStat> =
        std::collections::BTreeMap::new();
    for name in note::BUILTIN_CATEGORIES {
        stats.entry(name.to_string()).or_default();
    }
    for category in note::pinned_categories() {
        stats.entry(category.name().to_string()).or_default();
    }
    for n in &outcome.notes {
        let entry = stats.entry(n.category.name().to_string()).or_default();
        entry.count += 1;
        if let Some(ts) = note::parse_timestamp(&n.timestamp) {
            entry.first = Some(entry.first.map_or(ts, |f| f.min(ts)));
            entry.last = Some(entry.last.map_or(ts, |l| l.max(ts)));
        }
    }

    for (name, stat) in stats {
        let first = stat
            .first
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "n/a".to_string());
        let last = stat
            .last
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{:10} | count {:4} | first {} | last {}",
            name, stat.count, first, last
        );
    }
    Ok(())
}

fn rotate_key(store: &mut NoteStore<FileStore>) -> Result<(), Box<dyn Error>> {
    let outcome = store.rotate_key()?;
    println!(
        "Rotated key to {}; re-encrypted {} note(s).",
        store.active_key_id(),
        outcome.migrated
    );
    if !outcome.unrecoverable.is_empty() {
        eprintln!(
            "{} note(s) could not be re-encrypted and were left as-is.",
            outcome.unrecoverable.len()
        );
    }
    Ok(())
}

fn export_notes(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let path = args.first().ok_or("Usage: sn export <file>")?;
    let count = store.export(Path::new(path))?;
    println!("Exported {count} note(s) to {path}");
    Ok(())
}

fn import_notes(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    let path = args.first().ok_or("Usage: sn import <file>")?;
    if !Path::new(path).exists() {
        return Err(format!("Import file not found: {path}").into());
    }
    let outcome = store.import(Path::new(path))?;
    println!(
        "Imported {} note(s) from {path} ({} duplicate(s) skipped)",
        outcome.imported, outcome.skipped
    );
    if outcome.dropped > 0 {
        eprintln!("{} record(s) could not be salvaged.", outcome.dropped);
    }
    Ok(())
}

fn seed_notes(
    args: Vec<String>,
    store: &mut NoteStore<FileStore>,
) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        return Err(
            "Usage: sn seed <count> [--chars N] [-c <category>]".into()
        );
    }
    let mut count: Option<usize> = None;
    let mut body_len: usize = 400;
    let mut category = note::default_category();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--chars" => {
                let v = iter.next().ok_or("Provide a value for --chars")?;
                body_len = v.parse().map_err(|_| "chars must be a number")?;
            }
            "-c" | "--category" => {
                let v = iter
                    .next()
                    .ok_or("Provide a category after -c/--category")?;
                category = Category::parse(&v);
            }
            other => {
                if other.starts_with('-') {
                    return Err(
                        format!("Unknown flag for seed: {other}").into()
                    );
                }
                if count.is_none() {
                    count = Some(
                        other.parse().map_err(|_| "Count must be a number")?,
                    );
                }
            }
        }
    }
    let count = count.ok_or("Provide a count for seed")?;

    for i in 0..count {
        let body = generate_body(body_len, i);
        let saved = store.save(&body, category.clone(), None)?;
        if (i + 1) % 50 == 0 || i + 1 == count {
            println!("Generated {}/{} (last id {})", i + 1, count, saved.id);
        }
    }
    Ok(())
}

fn generate_body(len: usize, seed: usize) -> String {
    let base = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Proin aliquet, mauris nec facilisis rhoncus, nisl justo viverra dui, vitae placerat metus erat sit amet nunc. ";
    let mut out = String::new();
    let mut n = 0;
    while out.len() < len {
        out.push_str(base);
        out.push_str(&format!("Seed chunk {seed} idx {n}. "));
        n += 1;
    }
    out.truncate(len);
    out
}
