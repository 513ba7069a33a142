use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, Array3, Array4, Axis};
use thiserror::Error;

/// Side length the model was trained on; every input is stretched to it.
pub const IMAGE_SIZE: u32 = 224;

const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("cannot assemble an empty batch")]
    EmptyBatch,
    #[error("inconsistent image shapes in batch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    #[error("failed to stack batch: {0}")]
    Stack(#[from] ndarray::ShapeError),
}

/// Decodes raw image bytes into a `(224, 224, 3)` array of `f32` in `[0, 1]`.
///
/// Any raster format the `image` crate can sniff is accepted; non-RGB inputs
/// (grayscale, RGBA, palette) are converted to three channels and the image
/// is stretched, not cropped, to the target size.
pub fn normalize_image(image_data: &[u8]) -> Result<Array3<f32>, PreprocessError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PreprocessError::Decode(image::ImageError::IoError(e)))?;

    let original_img = image_reader.decode()?;
    let img = original_img.resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom);

    let mut normalized = Array::zeros((IMAGE_SIZE as usize, IMAGE_SIZE as usize, CHANNELS));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        normalized[[y, x, 0]] = (r as f32) / 255.;
        normalized[[y, x, 1]] = (g as f32) / 255.;
        normalized[[y, x, 2]] = (b as f32) / 255.;
    }

    Ok(normalized)
}

/// Stacks identically shaped normalized images into an `(N, 224, 224, 3)`
/// batch along a new leading axis, preserving input order.
pub fn stack_batch(images: &[Array3<f32>]) -> Result<Array4<f32>, PreprocessError> {
    let first = images.first().ok_or(PreprocessError::EmptyBatch)?;
    let expected = first.dim();
    for image in images {
        if image.dim() != expected {
            return Err(PreprocessError::ShapeMismatch {
                expected,
                got: image.dim(),
            });
        }
    }

    let views: Vec<_> = images.iter().map(Array3::view).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
