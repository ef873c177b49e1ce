//! Image transformation engine.
//!
//! Stateless decode → transform → encode over scratch files.
//!
//! | Task | Operation |
//! |---|---|
//! | `resize` | `DynamicImage::resize_exact` with `Lanczos3` to exactly width × height |
//! | `watermark` | text rasterized with `ab_glyph` onto an RGBA copy of the source |
//! | `thumbnail-generate` | resize to a fixed 200 × 200 box, aspect ratio ignored |

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::models::image::ImageFormat;
use crate::models::job::{TaskSpec, THUMBNAIL_SIZE};

pub const WATERMARK_FONT_SIZE: f32 = 60.0;

/// Distance of the watermark baseline above the bottom edge.
pub const WATERMARK_BOTTOM_OFFSET: u32 = 30;

/// Non-premultiplied RGBA; the alpha channel scales glyph coverage.
pub const WATERMARK_COLOR: Rgba<u8> = Rgba([255, 20, 100, 100]);

/// Applies a [`TaskSpec`] to an image file.
#[derive(Debug, Clone)]
pub struct Transformer {
    font_path: PathBuf,
}

impl Transformer {
    pub fn new(font_path: impl Into<PathBuf>) -> Self {
        Self {
            font_path: font_path.into(),
        }
    }

    /// Decode `src` as `format`, apply `task`, and encode the result into `dst`
    /// in the same format. Blocking; call from a blocking-capable thread.
    pub fn apply(
        &self,
        task: &TaskSpec,
        format: ImageFormat,
        src: &Path,
        dst: &Path,
    ) -> Result<(), TransformError> {
        let source = decode(format, src)?;

        let output = match task {
            TaskSpec::Resize { width, height } => resize(&source, *width, *height)?,
            TaskSpec::Thumbnail => thumbnail(&source)?,
            TaskSpec::Watermark { text } => {
                let font = self.load_font()?;
                DynamicImage::ImageRgba8(watermark(&source, text, &font))
            }
        };

        encode(&output, format, dst)
    }

    fn load_font(&self) -> Result<FontVec, TransformError> {
        let bytes = std::fs::read(&self.font_path).map_err(|e| TransformError::Font {
            path: self.font_path.clone(),
            message: e.to_string(),
        })?;
        FontVec::try_from_vec(bytes).map_err(|e| TransformError::Font {
            path: self.font_path.clone(),
            message: e.to_string(),
        })
    }
}

pub fn decode(format: ImageFormat, path: &Path) -> Result<DynamicImage, TransformError> {
    let bytes = std::fs::read(path)?;
    image::load_from_memory_with_format(&bytes, format.into()).map_err(TransformError::Decode)
}

/// Encode `image` into `path` as `format`.
pub fn encode(image: &DynamicImage, format: ImageFormat, path: &Path) -> Result<(), TransformError> {
    let mut writer = BufWriter::new(File::create(path)?);

    match format {
        // JPEG carries no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut writer, image::ImageFormat::Jpeg),
        ImageFormat::Png => image.write_to(&mut writer, image::ImageFormat::Png),
        ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_to(&mut writer, image::ImageFormat::Gif),
    }
    .map_err(TransformError::Encode)?;

    writer.flush()?;
    Ok(())
}

/// Resample to exactly `width` × `height`.
pub fn resize(image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage, TransformError> {
    if width == 0 || height == 0 {
        return Err(TransformError::InvalidDimensions { width, height });
    }
    Ok(image.resize_exact(width, height, FilterType::Lanczos3))
}

pub fn thumbnail(image: &DynamicImage) -> Result<DynamicImage, TransformError> {
    resize(image, THUMBNAIL_SIZE, THUMBNAIL_SIZE)
}

/// Pen position for the watermark: horizontally centered, baseline
/// [`WATERMARK_BOTTOM_OFFSET`] pixels above the bottom edge.
pub fn watermark_origin(width: u32, height: u32) -> (f32, f32) {
    let x = width / 2;
    let y = height as i64 - WATERMARK_BOTTOM_OFFSET as i64;
    (x as f32, y as f32)
}

/// Draw `text` onto a full-alpha copy of `image`.
pub fn watermark(image: &DynamicImage, text: &str, font: &impl Font) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    let origin = watermark_origin(canvas.width(), canvas.height());
    draw_text(&mut canvas, font, text, origin, WATERMARK_FONT_SIZE, WATERMARK_COLOR);
    canvas
}

fn draw_text(
    canvas: &mut RgbaImage,
    font: &impl Font,
    text: &str,
    origin: (f32, f32),
    size: f32,
    color: Rgba<u8>,
) {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);

    let mut caret = point(origin.0, origin.1);
    let mut previous: Option<GlyphId> = None;

    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            caret.x += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, caret);
        caret.x += scaled.h_advance(id);
        previous = Some(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i64 + gx as i64;
            let y = bounds.min.y as i64 + gy as i64;
            if x < 0 || y < 0 || x >= width || y >= height {
                return;
            }
            blend(canvas.get_pixel_mut(x as u32, y as u32), color, coverage);
        });
    }
}

/// Source-over blend of `color` onto `dst`, weighted by glyph coverage.
pub fn blend(dst: &mut Rgba<u8>, color: Rgba<u8>, coverage: f32) {
    let alpha = (color[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }

    for c in 0..3 {
        let value = color[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    let dst_alpha = dst[3] as f32 / 255.0;
    dst[3] = ((alpha + dst_alpha * (1.0 - alpha)) * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid target size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("watermark font unavailable at {path}: {message}")]
    Font { path: PathBuf, message: String },

    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}
