use crate::{
    config::ImageConfig,
    imaging::{image_to_tensor, tensor_to_jpeg, ImagingError},
    model_service::{ModelError, ModelService},
    scratch::RequestScratch,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StyleTransferError {
    #[error("No image uploaded")]
    NoImage,
    #[error("Image too large: {0}")]
    TooLarge(String),
    #[error("{0}")]
    Processing(String),
}

impl From<ImagingError> for StyleTransferError {
    fn from(err: ImagingError) -> Self {
        StyleTransferError::Processing(err.to_string())
    }
}

impl From<ModelError> for StyleTransferError {
    fn from(err: ModelError) -> Self {
        StyleTransferError::Processing(err.to_string())
    }
}

impl From<std::io::Error> for StyleTransferError {
    fn from(err: std::io::Error) -> Self {
        StyleTransferError::Processing(format!("scratch storage: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl StyleTransferError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StyleTransferError::NoImage => StatusCode::BAD_REQUEST,
            StyleTransferError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            StyleTransferError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StyleTransferError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            StyleTransferError::NoImage => ErrorBody {
                error: "No image uploaded".into(),
                details: None,
            },
            StyleTransferError::TooLarge(details) => ErrorBody {
                error: "Image too large".into(),
                details: Some(details),
            },
            StyleTransferError::Processing(details) => ErrorBody {
                error: "Style transfer failed".into(),
                details: Some(details),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Runs one upload through the network and returns the stylized JPEG.
///
/// The upload and the result are kept in a scratch directory private to this
/// call, which is gone once the function returns.
pub fn stylize<M: ModelService + ?Sized>(
    model: &M,
    image_data: &[u8],
    image_config: &ImageConfig,
    scratch_parent: Option<&Path>,
) -> Result<Vec<u8>, StyleTransferError> {
    let scratch = RequestScratch::create(scratch_parent)?;
    scratch.save_input(image_data)?;
    tracing::debug!("Image saved in {:?}", scratch.path());

    let input = image_to_tensor(image_data, image_config.size)?;
    let output = model.transform(input)?;
    let jpeg = tensor_to_jpeg(&output, image_config.jpeg_quality)?;

    scratch.save_output(&jpeg)?;
    tracing::debug!("Styled image saved as {:?}", scratch.output_path());

    Ok(jpeg)
}
