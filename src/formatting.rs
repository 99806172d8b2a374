use crate::note::Category;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use terminal_size::{Width, terminal_size};
use yansi::Paint;

/// Color palette for consistent theming
pub struct ColorPalette {
    pub primary: (u8, u8, u8),   // IDs, muted text
    pub timestamp: (u8, u8, u8), // Timestamps
    pub heading: (u8, u8, u8),   // View headers, markdown headings
    pub highlight: (u8, u8, u8), // Search matches
}

impl ColorPalette {
    pub const CATPPUCCIN: Self = Self {
        primary: (108, 112, 134),   // Gray
        timestamp: (137, 180, 250), // Blue
        heading: (148, 226, 213),   // Teal
        highlight: (243, 139, 168), // Pink
    };
}

/// Fixed badge colors for the built-in categories; custom categories get a
/// stable hash-picked color.
fn color_for_category(category: &Category) -> (u8, u8, u8) {
    match category {
        Category::Sql => (0, 123, 255),
        Category::Url => (40, 167, 69),
        Category::Snippet => (220, 53, 69),
        Category::Command => (255, 193, 7),
        Category::Other => (108, 117, 125),
        Category::Custom(name) => {
            const PALETTE: &[(u8, u8, u8)] = &[
                (137, 180, 250),
                (166, 227, 161),
                (249, 226, 175),
                (245, 194, 231),
                (148, 226, 213),
                (198, 160, 246),
                (255, 214, 165),
                (186, 225, 255),
            ];
            let mut h: u64 = 5381;
            for b in name.bytes() {
                h = (h.wrapping_shl(5)).wrapping_add(h) ^ u64::from(b);
            }
            PALETTE[(h as usize) % PALETTE.len()]
        }
    }
}

/// Formatting context passed through rendering pipeline
pub struct FormatContext {
    pub use_color: bool,
    pub palette: ColorPalette,
}

impl FormatContext {
    pub fn new(use_color: bool) -> Self {
        Self { use_color, palette: ColorPalette::CATPPUCCIN }
    }

    pub fn from_env() -> Self {
        let use_color = std::env::var("NO_COLOR").is_err();
        Self::new(use_color)
    }

    pub fn format_id(&self, id: i64) -> String {
        let text = id.to_string();
        if self.use_color {
            let (r, g, b) = self.palette.primary;
            Paint::rgb(&text, r, g, b).to_string()
        } else {
            text
        }
    }

    pub fn format_header(&self, text: &str) -> String {
        if self.use_color {
            let (r, g, b) = self.palette.heading;
            Paint::rgb(text, r, g, b).bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// Compact timestamp for list rows; stored timestamps are RFC 3339.
    pub fn format_timestamp(&self, ts: &str) -> String {
        let compact = match crate::note::parse_timestamp(ts) {
            Some(dt) => dt.format("%d%b%y %H:%M").to_string(),
            None => ts.split_whitespace().take(1).collect(),
        };
        if self.use_color {
            let (r, g, b) = self.palette.timestamp;
            Paint::rgb(&compact, r, g, b).to_string()
        } else {
            compact
        }
    }

    /// Upper-case category badge, padded so list rows line up.
    pub fn format_category(&self, category: &Category) -> String {
        let badge = format!("{:<8}", category.name().to_uppercase());
        if self.use_color {
            let (r, g, b) = color_for_category(category);
            Paint::rgb(&badge, r, g, b).bold().to_string()
        } else {
            badge
        }
    }

    pub fn highlight_match(&self, text: &str, query: Option<&str>) -> String {
        let Some(q) = query else { return text.to_string() };
        if q.is_empty() || !self.use_color {
            return text.to_string();
        }

        let q_lower = q.to_lowercase();
        let mut out = String::new();
        let mut remaining = text;

        while let Some(pos) = remaining.to_lowercase().find(&q_lower) {
            let (before, rest) = remaining.split_at(pos);
            let (matched, after) = rest.split_at(q.len().min(rest.len()));
            out.push_str(before);

            let (r, g, b) = self.palette.highlight;
            out.push_str(&Paint::rgb(matched, r, g, b).to_string());

            remaining = after;
        }
        out.push_str(remaining);
        out
    }
}

/// Single-line preview of decrypted note text, truncated to the terminal
/// width (with room for the id, timestamp, and badge columns).
pub fn preview_line(text: &str) -> String {
    let first_line =
        text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let max_width = match terminal_size() {
        Some((Width(w), _)) => (w as usize).saturating_sub(44).max(20),
        None => 100,
    };
    truncate_with_ellipsis(first_line, max_width)
}

/// Truncate text to a width, appending an ellipsis when needed.
pub fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    let len = text.chars().count();
    if len <= max_width {
        return text.to_string();
    }
    if max_width == 1 {
        return "…".to_string();
    }
    let mut out =
        text.chars().take(max_width.saturating_sub(1)).collect::<String>();
    out.push('…');
    out
}

/// Render markdown with lightweight terminal styling.
pub fn render_markdown(input: &str, ctx: &FormatContext) -> String {
    let mut rendered = String::new();
    let mut list_depth: usize = 0;

    for event in Parser::new(input) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                rendered.push('\n');
                let mark = match level {
                    HeadingLevel::H1 => "# ",
                    HeadingLevel::H2 => "## ",
                    HeadingLevel::H3 => "### ",
                    HeadingLevel::H4 => "#### ",
                    HeadingLevel::H5 => "##### ",
                    _ => "###### ",
                };
                rendered.push_str(&ctx.format_header(mark));
            }
            Event::End(TagEnd::Heading(_)) => rendered.push('\n'),
            Event::Start(Tag::List(_)) => {
                list_depth += 1;
            }
            Event::End(TagEnd::List(_)) => {
                if list_depth > 0 {
                    list_depth -= 1;
                }
                rendered.push('\n');
            }
            Event::Start(Tag::Item) => {
                rendered.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                if ctx.use_color {
                    rendered.push_str(&Paint::yellow("- ").bold().to_string());
                } else {
                    rendered.push_str("- ");
                }
            }
            Event::Text(t) | Event::Code(t) => rendered.push_str(&t),
            Event::SoftBreak | Event::HardBreak => rendered.push('\n'),
            Event::Rule => {
                if ctx.use_color {
                    rendered.push_str(&Paint::new("\n---\n").dim().to_string());
                } else {
                    rendered.push_str("\n---\n");
                }
            }
            Event::Html(t) => rendered.push_str(&t),
            _ => {}
        }
    }

    rendered.trim().to_string()
}
