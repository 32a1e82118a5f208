mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "walkbus_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli::run() {
        cli::RunOutcome::Serve(addr, config) => walkbus_worker::serve(addr, config).await,
        cli::RunOutcome::Exit(code) => std::process::exit(code),
    }
}
