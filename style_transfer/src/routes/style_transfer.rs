use super::STYLE_TRANSFER_ROUTE;
use crate::{
    model_service::ModelService,
    server::SharedState,
    stylize::{stylize, StyleTransferError},
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

#[instrument(skip(state, multipart))]
pub async fn style_transfer<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    tracing::info!("Received a request for style transfer");
    let start_time = Instant::now();

    match transfer(&state, multipart).await {
        Ok(styled_image) => {
            state
                .metrics
                .record_success(start_time.elapsed().as_secs_f64(), STYLE_TRANSFER_ROUTE);
            state
                .metrics
                .record_request(STYLE_TRANSFER_ROUTE, StatusCode::OK.as_u16());

            tracing::info!("Sending styled image to client");
            ([(header::CONTENT_TYPE, "image/jpeg")], styled_image).into_response()
        }
        Err(err) => {
            match &err {
                StyleTransferError::NoImage => tracing::warn!("No image uploaded in the request"),
                StyleTransferError::TooLarge(details) => {
                    tracing::warn!("Upload over the size limit: {}", details)
                }
                StyleTransferError::Processing(details) => {
                    tracing::error!("Error during style transfer: {}", details)
                }
            }
            state
                .metrics
                .record_request(STYLE_TRANSFER_ROUTE, err.status_code().as_u16());
            err.into_response()
        }
    }
}

async fn transfer<M: ModelService>(
    state: &SharedState<M>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, StyleTransferError> {
    let image_data = read_image_field(multipart).await?;

    let model_service = state.model_service.clone();
    let image_config = state.image_config.clone();
    let scratch_dir = state.scratch_dir.clone();

    tokio::task::spawn_blocking(move || {
        stylize(
            model_service.as_ref(),
            &image_data,
            &image_config,
            scratch_dir.as_deref(),
        )
    })
    .await
    .map_err(|e| StyleTransferError::Processing(format!("processing task failed: {}", e)))?
}

async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, StyleTransferError> {
    let mut multipart = multipart.map_err(|rejection| {
        tracing::warn!("Request body is not a multipart form: {}", rejection);
        StyleTransferError::NoImage
    })?;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(IMAGE_FIELD) => {
                return field.bytes().await.map_err(multipart_failure);
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(StyleTransferError::NoImage),
            Err(e) => return Err(multipart_failure(e)),
        }
    }
}

/// Body limit hits and read failures keep their own outcome; only a form
/// that cannot be parsed counts as carrying no image.
fn multipart_failure(err: MultipartError) -> StyleTransferError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        StyleTransferError::TooLarge(err.body_text())
    } else if status.is_server_error() {
        StyleTransferError::Processing(err.body_text())
    } else {
        tracing::warn!("Malformed multipart body: {}", err.body_text());
        StyleTransferError::NoImage
    }
}
