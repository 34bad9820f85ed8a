use crate::{
    config::{Config, ImageConfig, ServerConfig},
    model_service::ModelService,
    routes::{api_routes, exporter_routes},
    telemetry::Metrics,
};
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    Router,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub metrics: Arc<Metrics>,
    pub image_config: ImageConfig,
    pub scratch_dir: Option<PathBuf>,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(model_service: M, metrics: Arc<Metrics>, config: &Config) -> Self {
        Self {
            model_service: Arc::new(model_service),
            metrics,
            image_config: config.image.clone(),
            scratch_dir: config.scratch.dir.clone(),
        }
    }
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            metrics: self.metrics.clone(),
            image_config: self.image_config.clone(),
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}

impl<M: ModelService> FromRef<SharedState<M>> for Arc<Metrics> {
    fn from_ref(state: &SharedState<M>) -> Self {
        state.metrics.clone()
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.image_config.max_upload_bytes);

    Router::new()
        .merge(api_routes::<M>())
        .layer(body_limit)
        .with_state(state)
}

pub fn build_exporter_router(metrics: Arc<Metrics>) -> Router {
    Router::new().merge(exporter_routes()).with_state(metrics)
}

pub struct HttpServer {
    name: &'static str,
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        name: &'static str,
        router: Router,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self {
            name,
            router,
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting {} on {}", self.name, addr),
            Err(e) => tracing::warn!("Starting {} on an unknown address: {}", self.name, e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LogLevel, ModelConfig, ScratchConfig},
        model_service::ModelError,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use image::{GenericImageView, ImageBuffer, Rgb};
    use ndarray::Array4;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "style-transfer-test-boundary";

    /// Stands in for the network; keeps the input size like the real one.
    struct MockModelService;

    impl ModelService for MockModelService {
        fn transform(&self, input: Array4<f32>) -> Result<Array4<f32>, ModelError> {
            Ok(input.mapv(|v| v * 0.5))
        }
    }

    fn test_config(scratch_dir: &std::path::Path) -> Config {
        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        Config {
            server: server.clone(),
            metrics_server: server,
            log_level: LogLevel::Info,
            model: ModelConfig {
                model_dir: PathBuf::from("."),
                onnx_file: "mosaic.onnx".to_string(),
                num_instances: 1,
            },
            image: ImageConfig::default(),
            scratch: ScratchConfig {
                dir: Some(scratch_dir.to_path_buf()),
            },
        }
    }

    fn test_app(scratch_dir: &std::path::Path) -> (Router, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let state = SharedState::new(MockModelService, metrics.clone(), &test_config(scratch_dir));
        (build_router(state), metrics)
    }

    fn solid_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([30, 120, 200]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Jpeg).unwrap();
        cursor.into_inner()
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/styleTransfer")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn scrape(router: &Router) -> String {
        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    fn sample(text: &str, name: &str, labels: &[&str]) -> u64 {
        text.lines()
            .filter(|line| line.starts_with(&format!("{}{{", name)))
            .filter(|line| labels.iter().all(|label| line.contains(label)))
            .filter_map(|line| line.rsplit(' ').next()?.parse::<u64>().ok())
            .sum()
    }

    #[tokio::test]
    async fn test_style_transfer_returns_jpeg() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, _) = test_app(scratch.path());

        let response = router
            .oneshot(multipart_request("image", &solid_jpeg(256, 256)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let body = body_bytes(response).await;
        assert!(!body.is_empty());
        let decoded = image::load_from_memory_with_format(&body, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (256, 256));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_field_is_bad_request() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, _) = test_app(scratch.path());

        let response = router
            .oneshot(multipart_request("picture", &solid_jpeg(16, 16)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "No image uploaded"})
        );
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, metrics) = test_app(scratch.path());

        let request = Request::post("/styleTransfer")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "No image uploaded"})
        );
        let text = metrics.encode().unwrap();
        assert_eq!(sample(&text, "flask_requests_total", &["status_code=\"400\""]), 1);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = test_config(scratch.path());
        config.image.max_upload_bytes = 1024;
        let metrics = Arc::new(Metrics::new().unwrap());
        let router = build_router(SharedState::new(MockModelService, metrics.clone(), &config));

        let response = router
            .oneshot(multipart_request("image", &[0xAB; 4096]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Image too large");
        assert!(body["details"].as_str().is_some_and(|d| !d.is_empty()));

        let text = metrics.encode().unwrap();
        assert_eq!(sample(&text, "flask_requests_total", &["status_code=\"413\""]), 1);
        assert_eq!(sample(&text, "flask_requests_total", &["status_code=\"400\""]), 0);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_non_image_bytes_fail_processing() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, _) = test_app(scratch.path());

        let response = router
            .oneshot(multipart_request("image", b"this is not an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Style transfer failed");
        assert!(body["details"].as_str().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn test_metrics_count_outcomes() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, _) = test_app(scratch.path());

        let baseline = scrape(&router).await;
        let ok_label = "status_code=\"200\"";
        let failed_label = "status_code=\"500\"";
        let ok_before = sample(&baseline, "flask_requests_total", &[ok_label]);
        let failed_before = sample(&baseline, "flask_requests_total", &[failed_label]);

        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(multipart_request("image", &solid_jpeg(64, 64)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(multipart_request("image", b"garbage"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        let response = router
            .clone()
            .oneshot(multipart_request("other", b"ignored"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let text = scrape(&router).await;
        assert_eq!(sample(&text, "flask_requests_total", &[ok_label]) - ok_before, 3);
        assert_eq!(sample(&text, "flask_requests_total", &[failed_label]) - failed_before, 2);
        assert_eq!(sample(&text, "flask_requests_total", &["status_code=\"400\""]), 1);
        // latency is only observed for requests that produced an image
        assert_eq!(sample(&text, "flask_request_duration_seconds_count", &[]), 3);
        assert_eq!(sample(&text, "flask_requests_rate_total", &[]), 3);
    }

    #[tokio::test]
    async fn test_exporter_serves_shared_registry() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, metrics) = test_app(scratch.path());
        let exporter = build_exporter_router(metrics);

        router
            .oneshot(multipart_request("image", &solid_jpeg(32, 32)))
            .await
            .unwrap();

        let text = scrape(&exporter).await;
        assert_eq!(sample(&text, "flask_requests_total", &["status_code=\"200\""]), 1);
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let scratch = tempfile::tempdir().unwrap();
        let (router, _) = test_app(scratch.path());

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": "Available"})
        );
    }

    #[tokio::test]
    async fn test_http_server_stops_on_shutdown() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = HttpServer::new("exporter", build_exporter_router(metrics), &config)
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let handle = server.run(shutdown_tx.subscribe());
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
