use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encodingsctl=info,encodings_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = encodingsctl::Cli::parse();
    if let Err(err) = encodingsctl::run(cli).await {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
