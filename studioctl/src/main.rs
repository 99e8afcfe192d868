use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = studioctl::Cli::parse();
    if let Err(err) = studioctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
