use clap::Parser;
use load_driver::{run, DriverConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Response lines go to stdout, diagnostics to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "load_driver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DriverConfig::parse();
    tracing::info!(
        url = %config.url,
        image = ?config.image_path,
        duration_secs = config.duration_secs,
        "Starting load driver"
    );

    let mut stdout = std::io::stdout();
    let iterations = run(&config, &mut stdout).await?;

    tracing::info!("Sent {} requests", iterations);
    Ok(())
}
