//! Conversion of arbitrary input images into the canonical thumbnail format.
//!
//! Decode strategy: try the raster decoder first; when it rejects the format
//! (not on I/O errors), fall back to the vector renderer, rasterize to an
//! intermediate PNG stream and run the raster decoder over that.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImage, ImageError, ImageOutputFormat, RgbaImage};
use resvg::{tiny_skia, usvg};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical output formats. Exactly one lossless raster format is supported;
/// callers can always rely on `Png`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThumbnailFormat {
    Png,
}

impl Default for ThumbnailFormat {
    fn default() -> Self {
        ThumbnailFormat::Png
    }
}

/// How the decoded image is fitted to the requested dimensions. Anchor is
/// always center; padding fill is fully transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResizeMode {
    /// Exact target size, aspect ratio kept by cropping the overflow.
    Crop,
    /// Exact target size, scaled (up or down) to fit, transparent padding.
    Pad,
    /// Exact target size, shrink-only fit, transparent padding.
    BoxPad,
    /// Constrains the longer edge; no padding, result may be smaller than the
    /// target on one axis.
    Max,
    /// Scales so the shorter edge meets its bound; no padding, result may
    /// exceed the target on one axis.
    Min,
}

#[derive(Debug, Clone, Copy)]
pub struct ResizeSpec {
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
}

/// Extensions worth attempting a decode on; used as a cheap prefilter when
/// scanning archive interiors for preview frames.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "ico", "tif", "tiff", "svg",
];

pub fn is_supported_image_ext(ext: &str) -> bool {
    let e = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&e.as_str())
}

#[derive(Debug, Default, Clone)]
pub struct ImageConverter;

impl ImageConverter {
    pub fn new() -> Self {
        Self
    }

    /// Decodes `input`, applies the optional resize policy and encodes into
    /// `format`. Format rejections surface as `UnsupportedFormat`.
    pub fn convert(
        &self,
        input: &[u8],
        format: ThumbnailFormat,
        resize: Option<ResizeSpec>,
    ) -> Result<Vec<u8>> {
        let decoded = self.decode(input)?;
        let resized = match resize {
            Some(spec) => apply_resize(decoded, spec),
            None => decoded,
        };
        encode(resized, format)
    }

    fn decode(&self, input: &[u8]) -> Result<DynamicImage> {
        match image::load_from_memory(input) {
            Ok(img) => Ok(img),
            // Only decode-format failures reroute to the fallback decoder.
            Err(ImageError::Decoding(_)) | Err(ImageError::Unsupported(_)) => {
                let intermediate = render_vector(input)?;
                image::load_from_memory(&intermediate)
                    .map_err(|e| Error::UnsupportedFormat(e.to_string()))
            }
            Err(ImageError::IoError(e)) => Err(Error::Io(e)),
            Err(e) => Err(Error::UnsupportedFormat(e.to_string())),
        }
    }
}

/// Secondary decoder: renders vector input (SVG) at its intrinsic size into
/// an intermediate PNG raster stream.
fn render_vector(input: &[u8]) -> Result<Vec<u8>> {
    let tree = usvg::Tree::from_data(input, &usvg::Options::default())
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    let size = tree.size();
    let (w, h) = (size.width().ceil() as u32, size.height().ceil() as u32);
    let mut pixmap = tiny_skia::Pixmap::new(w.max(1), h.max(1))
        .ok_or_else(|| Error::UnsupportedFormat("vector image has zero size".into()))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    pixmap
        .encode_png()
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))
}

fn apply_resize(img: DynamicImage, spec: ResizeSpec) -> DynamicImage {
    let (tw, th) = (spec.width.max(1), spec.height.max(1));
    let (w, h) = (img.width().max(1), img.height().max(1));
    match spec.mode {
        ResizeMode::Crop => img.resize_to_fill(tw, th, FilterType::Lanczos3),
        ResizeMode::Max => img.resize(tw, th, FilterType::Lanczos3),
        ResizeMode::Min => {
            let scale = f64::max(tw as f64 / w as f64, th as f64 / h as f64);
            let nw = ((w as f64 * scale).round() as u32).max(tw);
            let nh = ((h as f64 * scale).round() as u32).max(th);
            img.resize_exact(nw.min(nw.max(tw)), nh, FilterType::Lanczos3)
        }
        ResizeMode::Pad => pad_to(img.resize(tw, th, FilterType::Lanczos3), tw, th),
        ResizeMode::BoxPad => {
            let fitted = if w > tw || h > th {
                img.resize(tw, th, FilterType::Lanczos3)
            } else {
                img
            };
            pad_to(fitted, tw, th)
        }
    }
}

/// Centers `img` on a transparent canvas of exactly `tw` x `th`.
fn pad_to(img: DynamicImage, tw: u32, th: u32) -> DynamicImage {
    let mut canvas = DynamicImage::ImageRgba8(RgbaImage::new(tw, th));
    let x = (tw.saturating_sub(img.width())) / 2;
    let y = (th.saturating_sub(img.height())) / 2;
    let _ = canvas.copy_from(&img.to_rgba8(), x, y);
    canvas
}

fn encode(img: DynamicImage, format: ThumbnailFormat) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ThumbnailFormat::Png => img
            .write_to(&mut out, ImageOutputFormat::Png)
            .map_err(|e| Error::UnsupportedFormat(e.to_string()))?,
    }
    Ok(out.into_inner())
}
