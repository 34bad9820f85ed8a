use crate::config::Config;
use crate::ort_service::OrtModelService;
use crate::server::{build_exporter_router, build_router, HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    tracing::info!("Loading pre-trained model from {:?}", config.model.get_path());
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Model loaded successfully");

    if let Some(dir) = &config.scratch.dir {
        std::fs::create_dir_all(dir)?;
    }

    let metrics = Arc::new(Metrics::new()?);
    let state = SharedState::new(model_service, metrics.clone(), &config);

    let server = HttpServer::new(
        "style transfer service",
        build_router(state),
        &config.server,
    )
    .await?;
    let exporter = HttpServer::new(
        "metrics exporter",
        build_exporter_router(metrics),
        &config.metrics_server,
    )
    .await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe());
    let exporter_handle = exporter.run(shutdown_tx.subscribe());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    for (name, handle) in [("server", server_handle), ("exporter", exporter_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("{} stopped with an error: {:?}", name, e),
            Err(e) => tracing::error!("{} task failed: {:?}", name, e),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
