use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr and stay out of command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = snip_notes::entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
