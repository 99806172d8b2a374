//! Alternate binary name (`sn`) that forwards to the `snip_notes` library.
//! Keeping the alias as a real binary avoids shell alias requirements.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = snip_notes::entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
