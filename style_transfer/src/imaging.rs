use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};
use ndarray::{Array, Array4, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Error decoding image: {0}")]
    Decode(String),
    #[error("Unexpected output tensor shape {0:?}, expected [1, 3, height, width]")]
    Shape(Vec<usize>),
    #[error("Error encoding image: {0}")]
    Encode(String),
}

/// Decodes any supported raster format into a `[1, 3, size, size]` tensor
/// holding RGB values in `[0, 255]`.
pub fn image_to_tensor(image_data: &[u8], size: u32) -> Result<Array4<f32>, ImagingError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ImagingError::Decode(e.to_string()))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| ImagingError::Decode(e.to_string()))?;

    let img = original_img
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();

    let mut input = Array::zeros((1, 3, size as usize, size as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = r as f32;
        input[[0, 1, y, x]] = g as f32;
        input[[0, 2, y, x]] = b as f32;
    }

    Ok(input)
}

/// Turns the network output back into a JPEG. Values outside `[0, 255]` are
/// clamped before the cast to 8 bits.
pub fn tensor_to_jpeg(output: &Array4<f32>, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let shape = output.shape();
    if shape[0] != 1 || shape[1] != 3 {
        return Err(ImagingError::Shape(shape.to_vec()));
    }
    let (height, width) = (shape[2], shape[3]);

    let chw = output.index_axis(Axis(0), 0);
    let img = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        image::Rgb([
            to_channel(chw[[0, y, x]]),
            to_channel(chw[[1, y, x]]),
            to_channel(chw[[2, y, x]]),
        ])
    });

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&img)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;

    Ok(buffer)
}

fn to_channel(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}
