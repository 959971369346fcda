//! RGBA downsampling built on top of `fast_image_resize`.

use anyhow::{anyhow, ensure};
use fast_image_resize as fir;

use crate::types::ImageDimensions;

use super::sample::sampled_dimensions;

/// Box-filter a straight-alpha RGBA8888 buffer down to `target`.
///
/// Area averaging matches what a subsampled decode produces.
pub fn resize_rgba(
    pixels: &[u8],
    source: ImageDimensions,
    target: ImageDimensions,
) -> crate::Result<Vec<u8>> {
    ensure!(!source.is_empty(), "source image has zero dimensions");
    ensure!(!target.is_empty(), "target dimensions must be non-zero");
    ensure!(pixels.len() >= source.rgba_len(), "source buffer is smaller than expected");

    let pixels = &pixels[..source.rgba_len()];
    if source == target {
        return Ok(pixels.to_vec());
    }

    let src_view =
        fir::images::ImageRef::new(source.width, source.height, pixels, fir::PixelType::U8x4)
            .map_err(|err| anyhow!("failed to prepare source image: {err}"))?;

    let mut dst_image = fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);

    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Box))
        .use_alpha(true);

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| anyhow!("fast image resize failed: {err}"))?;

    Ok(dst_image.into_vec())
}

/// Shrink a full-size RGBA buffer as if it had been decoded at `factor`.
pub fn downsample(
    pixels: Vec<u8>,
    source: ImageDimensions,
    factor: u32,
) -> crate::Result<(ImageDimensions, Vec<u8>)> {
    let target = sampled_dimensions(source, factor);
    if target == source {
        return Ok((source, pixels));
    }
    let resized = resize_rgba(&pixels, source, target)?;
    Ok((target, resized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        let width_divisor = width.saturating_sub(1).max(1);
        let height_divisor = height.saturating_sub(1).max(1);
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255) / width_divisor).min(255) as u8;
                let g = ((y * 255) / height_divisor).min(255) as u8;
                pixels.extend_from_slice(&[r, g, 0, 255]);
            }
        }
        pixels
    }

    #[test]
    fn downsample_rounds_odd_sizes_up() {
        let source = ImageDimensions::new(9, 5);
        let (dims, pixels) = downsample(gradient(9, 5), source, 2).expect("downsample");
        assert_eq!(dims, ImageDimensions::new(5, 3));
        assert_eq!(pixels.len(), dims.rgba_len());
    }

    #[test]
    fn factor_one_returns_buffer_untouched() {
        let source = ImageDimensions::new(4, 4);
        let original = gradient(4, 4);
        let (dims, pixels) = downsample(original.clone(), source, 1).expect("downsample");
        assert_eq!(dims, source);
        assert_eq!(pixels, original);
    }

    #[test]
    fn box_downscale_preserves_gradient_shape() {
        let source = ImageDimensions::new(8, 8);
        let target = ImageDimensions::new(4, 4);
        let resized = resize_rgba(&gradient(8, 8), source, target).expect("resize");

        let top_left = &resized[0..4];
        let bottom_right_start = resized.len() - 4;
        let bottom_right = &resized[bottom_right_start..];
        assert!(top_left[0] < bottom_right[0], "red channel should increase across gradient");
        assert!(top_left[1] < bottom_right[1], "green channel should increase across gradient");
    }

    #[test]
    fn rejects_zero_targets_and_short_buffers() {
        let source = ImageDimensions::new(2, 2);
        let err = resize_rgba(&[255; 16], source, ImageDimensions::new(0, 2))
            .expect_err("zero width must fail");
        assert!(err.to_string().contains("target dimensions"));

        let err = resize_rgba(&[255; 8], source, ImageDimensions::new(1, 1))
            .expect_err("short buffer must fail");
        assert!(err.to_string().contains("smaller than expected"));
    }
}
