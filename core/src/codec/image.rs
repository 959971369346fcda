//! `image`-crate backed decoder with bounds-only probing and sampled decoding.

use std::io::Cursor;
use std::path::Path;

use anyhow::anyhow;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder as _, ImageFormat, ImageReader, RgbaImage};
use moxcms::{CmsError, ColorProfile, Layout, TransformOptions};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::pipeline::resize::downsample;
use crate::source::ByteSource;
use crate::types::{ImageDimensions, ImageKey, NativeDimensions};

use super::{DecodedBitmap, Decoder};

/// Header-level facts about a source, read without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub dimensions: NativeDimensions,
    pub mime: Option<&'static str>,
}

/// Decodes JPEG, PNG, WebP, and GIF (first frame) bytes pulled from a [`ByteSource`].
///
/// Output is straight-alpha RGBA8888 with EXIF orientation applied and embedded ICC
/// profiles converted to sRGB.
#[derive(Debug)]
pub struct RasterDecoder<S> {
    source: S,
}

impl<S: ByteSource> RasterDecoder<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Probe dimensions and format of `key`.
    pub fn describe(&self, key: &ImageKey) -> Result<SourceInfo, DecodeError> {
        let data = self.read(key)?;
        let reader = open_reader(key, &data)?;
        let mime = reader.format().map(|format| format.to_mime_type());
        let mut decoder = reader.into_decoder().map_err(|err| malformed(key, err))?;

        let (width, height) = decoder.dimensions();
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let dimensions = if swaps_axes(orientation) {
            ImageDimensions { width: height, height: width }
        } else {
            ImageDimensions { width, height }
        };

        Ok(SourceInfo { dimensions, mime })
    }

    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError> {
        let data = self.source.read(key)?;
        if data.is_empty() {
            return Err(DecodeError::Malformed {
                key: key.to_string(),
                message: "empty image data".to_string(),
            });
        }
        Ok(data)
    }
}

impl<S: ByteSource> Decoder for RasterDecoder<S> {
    fn probe_dimensions(&self, key: &ImageKey) -> Result<NativeDimensions, DecodeError> {
        self.describe(key).map(|info| info.dimensions)
    }

    fn decode(&self, key: &ImageKey, sample_factor: u32) -> Result<DecodedBitmap, DecodeError> {
        let data = self.read(key)?;
        let mut decoder =
            open_reader(key, &data)?.into_decoder().map_err(|err| malformed(key, err))?;

        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let icc_profile = decoder.icc_profile().unwrap_or(None);

        let mut image = DynamicImage::from_decoder(decoder).map_err(|err| malformed(key, err))?;
        apply_orientation(&mut image, orientation);

        let mut rgba = image.into_rgba8();
        if let Some(profile) = icc_profile {
            if let Err(err) = convert_to_srgb_in_place(&mut rgba, &profile) {
                warn!(target: "codec::image", key = %key, "failed to convert ICC profile: {err}");
            }
        }

        let full = ImageDimensions { width: rgba.width(), height: rgba.height() };
        if full.is_empty() {
            return Err(DecodeError::EmptyImage {
                key: key.to_string(),
                width: full.width,
                height: full.height,
            });
        }

        let (dimensions, pixels) =
            downsample(rgba.into_raw(), full, sample_factor).map_err(|err| malformed(key, err))?;
        debug!(
            target: "codec::image",
            key = %key,
            sample_factor,
            width = dimensions.width,
            height = dimensions.height,
            "decoded"
        );

        Ok(DecodedBitmap::new(dimensions, sample_factor, pixels))
    }
}

fn open_reader<'a>(
    key: &ImageKey,
    data: &'a [u8],
) -> Result<ImageReader<Cursor<&'a [u8]>>, DecodeError> {
    match infer_format(Path::new(key.as_str())) {
        Some(format) => Ok(ImageReader::with_format(Cursor::new(data), format)),
        None => ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|err| DecodeError::Io { key: key.to_string(), message: err.to_string() }),
    }
}

fn malformed(key: &ImageKey, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed { key: key.to_string(), message: err.to_string() }
}

fn infer_format(path: &Path) -> Option<ImageFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .and_then(|ext| ImageFormat::from_extension(&ext))
}

fn swaps_axes(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90
            | Orientation::Rotate270
            | Orientation::Rotate90FlipH
            | Orientation::Rotate270FlipH
    )
}

fn apply_orientation(image: &mut DynamicImage, orientation: Orientation) {
    if orientation != Orientation::NoTransforms {
        image.apply_orientation(orientation);
    }
}

fn convert_to_srgb_in_place(image: &mut RgbaImage, profile_bytes: &[u8]) -> crate::Result<()> {
    let src_profile = ColorProfile::new_from_slice(profile_bytes)
        .map_err(|err| anyhow!("invalid ICC profile: {err}"))?;
    let dest_profile = ColorProfile::new_srgb();
    let (width, height) = image.dimensions();
    let raw = image.as_mut();

    match src_profile.create_transform_8bit(
        Layout::Rgba,
        &dest_profile,
        Layout::Rgba,
        TransformOptions::default(),
    ) {
        Ok(transform) => {
            let mut dst = vec![0u8; raw.len()];
            let raw_slice: &[u8] = &raw[..];
            transform
                .transform(raw_slice, &mut dst)
                .map_err(|err| anyhow!("icc transform failed: {err}"))?;
            raw.copy_from_slice(&dst);
            Ok(())
        }
        Err(CmsError::InvalidLayout) => {
            let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
            for px in raw.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            let mut dst_rgb = vec![0u8; rgb.len()];
            let transform = src_profile.create_transform_8bit(
                Layout::Rgb,
                &dest_profile,
                Layout::Rgb,
                TransformOptions::default(),
            )?;
            transform
                .transform(&rgb, &mut dst_rgb)
                .map_err(|err| anyhow!("icc transform failed: {err}"))?;
            for (rgba_px, rgb_px) in raw.chunks_exact_mut(4).zip(dst_rgb.chunks_exact(3)) {
                rgba_px[0..3].copy_from_slice(rgb_px);
            }
            Ok(())
        }
        Err(err) => Err(anyhow!("icc transform setup failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use image::{ImageBuffer, Rgba};
    use moxcms::RenderingIntent;

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let dynamic = match format {
            ImageFormat::Jpeg => {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).into_rgb8())
            }
            _ => DynamicImage::ImageRgba8(image),
        };
        let mut cursor = Cursor::new(Vec::new());
        dynamic.write_to(&mut cursor, format).expect("encode sample");
        cursor.into_inner()
    }

    fn decoder_with(entries: &[(&str, Vec<u8>)]) -> RasterDecoder<InMemorySource> {
        let source = InMemorySource::new();
        for (key, bytes) in entries {
            source.insert(ImageKey::new(*key), bytes.clone());
        }
        RasterDecoder::new(source)
    }

    #[test]
    fn probe_reports_native_size_and_mime() {
        let decoder = decoder_with(&[("photo.png", encode(64, 32, ImageFormat::Png))]);
        let info = decoder.describe(&ImageKey::new("photo.png")).expect("describe");
        assert_eq!(info.dimensions, ImageDimensions::new(64, 32));
        assert_eq!(info.mime, Some("image/png"));
    }

    #[test]
    fn sniffs_format_when_key_has_no_extension() {
        let decoder = decoder_with(&[("blob", encode(8, 8, ImageFormat::Jpeg))]);
        let info = decoder.describe(&ImageKey::new("blob")).expect("describe");
        assert_eq!(info.mime, Some("image/jpeg"));
        assert_eq!(info.dimensions, ImageDimensions::new(8, 8));
    }

    #[test]
    fn decodes_at_sample_factor() {
        let decoder = decoder_with(&[("photo.png", encode(64, 32, ImageFormat::Png))]);
        let bitmap = decoder.decode(&ImageKey::new("photo.png"), 4).expect("decode");
        assert_eq!(bitmap.dimensions(), ImageDimensions::new(16, 8));
        assert_eq!(bitmap.sample_factor(), 4);
        assert_eq!(bitmap.byte_cost(), 16 * 8 * 4);
    }

    #[test]
    fn decodes_full_size_at_factor_one() {
        let decoder = decoder_with(&[("page.webp", encode(5, 3, ImageFormat::WebP))]);
        let bitmap = decoder.decode(&ImageKey::new("page.webp"), 1).expect("decode");
        assert_eq!(bitmap.dimensions(), ImageDimensions::new(5, 3));
        assert_eq!(bitmap.pixels().len(), 5 * 3 * 4);
    }

    #[test]
    fn rejects_empty_and_corrupt_input() {
        let decoder = decoder_with(&[("empty.png", Vec::new()), ("junk.png", vec![1, 2, 3, 4])]);

        let err = decoder.decode(&ImageKey::new("empty.png"), 1).unwrap_err();
        assert!(err.to_string().contains("empty image data"));
        assert!(matches!(
            decoder.probe_dimensions(&ImageKey::new("junk.png")),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decoder.decode(&ImageKey::new("missing.png"), 1),
            Err(DecodeError::NotFound { .. })
        ));
    }

    #[test]
    fn apply_orientation_rotates_dimensions() {
        let mut image = DynamicImage::ImageRgba8(ImageBuffer::from_fn(2, 1, |x, _| match x {
            0 => Rgba([255, 0, 0, 255]),
            _ => Rgba([0, 255, 0, 255]),
        }));

        apply_orientation(&mut image, Orientation::Rotate90);

        assert_eq!(image.width(), 1);
        assert_eq!(image.height(), 2);
        assert!(swaps_axes(Orientation::Rotate270));
        assert!(!swaps_axes(Orientation::Rotate180));
    }

    #[test]
    fn icc_conversion_preserves_alpha() {
        let mut image: RgbaImage = ImageBuffer::from_pixel(1, 1, Rgba([200, 100, 50, 128]));
        let mut profile = ColorProfile::new_display_p3();
        profile.rendering_intent = RenderingIntent::RelativeColorimetric;
        let icc_bytes = profile.encode().expect("encode profile");

        convert_to_srgb_in_place(&mut image, &icc_bytes).expect("icc conversion");

        let pixel = image.get_pixel(0, 0);
        assert_eq!(pixel[3], 128);
        assert_ne!(&pixel.0[..3], &[200, 100, 50]);
    }
}
