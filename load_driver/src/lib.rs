use anyhow::Context;
use clap::Parser;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use std::{io::Write, path::PathBuf, time::Duration};
use tokio::time::{sleep, Instant};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "load_driver",
    about = "Uploads an image to the style transfer service for a fixed duration"
)]
pub struct DriverConfig {
    /// Style transfer endpoint
    #[arg(
        long,
        default_value = "http://localhost:5001/styleTransfer",
        env = "LOAD_DRIVER_URL"
    )]
    pub url: String,

    /// Image uploaded on every iteration, read from disk each time
    #[arg(long, default_value = "carlsen.jpg", env = "LOAD_DRIVER_IMAGE")]
    pub image_path: PathBuf,

    /// How long to keep sending, in seconds
    #[arg(long, default_value_t = 60, env = "LOAD_DRIVER_DURATION_SECS")]
    pub duration_secs: u64,

    /// Pause after each response, in milliseconds
    #[arg(long, default_value_t = 1000, env = "LOAD_DRIVER_INTERVAL_MS")]
    pub interval_ms: u64,
}

impl DriverConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Posts the image once per iteration until the duration elapses, writing one
/// line per attempt to `out`. Returns the number of attempts.
///
/// Failed requests are reported and the loop carries on at the same pace.
pub async fn run<W: Write>(config: &DriverConfig, out: &mut W) -> anyhow::Result<usize> {
    let client = Client::new();
    let file_name = config
        .image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());

    let start_time = Instant::now();
    let mut iterations = 0;

    while start_time.elapsed() < config.duration() {
        let image_data = tokio::fs::read(&config.image_path)
            .await
            .with_context(|| format!("failed to read image {:?}", config.image_path))?;

        match post_image(&client, &config.url, image_data, &file_name).await {
            Ok((status, body)) => writeln!(
                out,
                "Response Status Code: {}, Response Body: {}",
                status.as_u16(),
                body
            )?,
            Err(e) => {
                tracing::warn!("Request to {} failed: {}", config.url, e);
                writeln!(out, "Request failed: {}", e)?;
            }
        }
        iterations += 1;

        sleep(config.interval()).await;
    }

    Ok(iterations)
}

async fn post_image(
    client: &Client,
    url: &str,
    image_data: Vec<u8>,
    file_name: &str,
) -> Result<(StatusCode, String), reqwest::Error> {
    let part = Part::bytes(image_data).file_name(file_name.to_string());
    let form = Form::new().part("image", part);

    let response = client.post(url).multipart(form).send().await?;
    let status = response.status();
    let body = response.text().await?;

    Ok((status, body))
}
