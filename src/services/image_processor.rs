// src/services/image_processor.rs
//! Raster primitives used by the frame renderer and the compositor.
//!
//! Every buffer is straight-alpha RGBA8 with a top-left origin. Rotation goes
//! through `tiny_skia` (premultiplied) and is converted back on the way out.

use crate::errors::CollageError;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage};
use resvg::tiny_skia;
use std::io::Cursor;

/// Uploads larger than this on their long side are scaled down on intake.
pub const MAX_UPLOAD_SIDE: u32 = 2048;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Drop shadow geometry: the shadow sits `SHADOW_OFFSET` px down-right and
/// the canvas grows by `SHADOW_MARGIN` px on both axes.
pub const SHADOW_OFFSET: u32 = 16;
pub const SHADOW_MARGIN: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Fill the target exactly, cropping the overflow.
    Cover,
    /// Fit inside the target and pad the rest with a background colour.
    Contain,
    /// Fit inside the target; the output may be smaller than requested.
    Inside,
}

/// Intersection of a placed layer with the canvas, in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A layer that is guaranteed to lie fully inside the canvas.
#[derive(Debug, Clone)]
pub struct PlacedLayer {
    pub image: RgbaImage,
    pub left: u32,
    pub top: u32,
}

/// Decode an upload into canonical RGBA, applying its EXIF orientation.
pub fn canonicalize(data: &[u8]) -> Result<RgbaImage, CollageError> {
    if data.is_empty() {
        return Err(CollageError::InvalidUpload(
            "Invalid upload file buffer".to_string(),
        ));
    }

    let invalid = |e: String| CollageError::InvalidUpload(format!("Invalid image format: {}", e));

    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?;
    let mut decoder = reader.into_decoder().map_err(|e| invalid(e.to_string()))?;
    let orientation = decoder.orientation().map_err(|e| invalid(e.to_string()))?;
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| invalid(e.to_string()))?;
    img.apply_orientation(orientation);

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(CollageError::InvalidUpload(
            "Image has zero dimensions".to_string(),
        ));
    }

    if width > MAX_UPLOAD_SIDE || height > MAX_UPLOAD_SIDE {
        img = img.resize(MAX_UPLOAD_SIDE, MAX_UPLOAD_SIDE, FilterType::Lanczos3);
    }

    Ok(img.to_rgba8())
}

/// Decode provider output (background or sticker art).
pub fn decode(data: &[u8]) -> Result<RgbaImage, CollageError> {
    let img = image::load_from_memory(data)
        .map_err(|e| CollageError::ComposeFailed(format!("Failed to load image: {}", e)))?;
    Ok(img.to_rgba8())
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, CollageError> {
    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| CollageError::ComposeFailed(format!("Failed to encode image: {}", e)))?;
    Ok(output)
}

pub fn fit_resize(
    img: &RgbaImage,
    target_w: u32,
    target_h: u32,
    mode: FitMode,
    background: Rgba<u8>,
) -> RgbaImage {
    let target_w = target_w.max(1);
    let target_h = target_h.max(1);
    let src = DynamicImage::ImageRgba8(img.clone());

    match mode {
        FitMode::Cover => src
            .resize_to_fill(target_w, target_h, FilterType::Lanczos3)
            .to_rgba8(),
        FitMode::Inside => src.resize(target_w, target_h, FilterType::Lanczos3).to_rgba8(),
        FitMode::Contain => {
            let fitted = src.resize(target_w, target_h, FilterType::Lanczos3).to_rgba8();
            let mut canvas = RgbaImage::from_pixel(target_w, target_h, background);
            let left = (target_w - fitted.width()) / 2;
            let top = (target_h - fitted.height()) / 2;
            imageops::overlay(&mut canvas, &fitted, i64::from(left), i64::from(top));
            canvas
        }
    }
}

/// Mask the buffer with a rounded rectangle covering its own bounds.
pub fn rounded_clip(img: &RgbaImage, radius: f64) -> RgbaImage {
    let (w, h) = img.dimensions();
    let max_radius = f64::from(w.min(h)) / 2.0;
    let r = if radius.is_finite() {
        radius.clamp(0.0, max_radius)
    } else {
        0.0
    };
    if r <= 0.0 {
        return img.clone();
    }

    let (wf, hf) = (f64::from(w), f64::from(h));
    let mut out = img.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let cx = f64::from(x) + 0.5;
        let cy = f64::from(y) + 0.5;
        let dx = (r - cx).max(cx - (wf - r)).max(0.0);
        let dy = (r - cy).max(cy - (hf - r)).max(0.0);
        if dx == 0.0 || dy == 0.0 {
            continue;
        }
        let coverage = (r - (dx * dx + dy * dy).sqrt() + 0.5).clamp(0.0, 1.0);
        pixel[3] = (f64::from(pixel[3]) * coverage).round() as u8;
    }
    out
}

/// Rotate clockwise about the centre. The output grows to bound the rotated
/// content; uncovered area is painted with `fill`.
pub fn rotate(img: &RgbaImage, degrees: f64, fill: Rgba<u8>) -> Result<RgbaImage, CollageError> {
    if !degrees.is_finite() || degrees % 360.0 == 0.0 {
        return Ok(img.clone());
    }

    let (w, h) = (f64::from(img.width()), f64::from(img.height()));
    let rad = degrees.to_radians();
    let (sin, cos) = (rad.sin().abs(), rad.cos().abs());
    // Trim float noise so right angles do not gain a pixel.
    let out_w = (w * cos + h * sin - 1e-6).ceil().max(1.0) as u32;
    let out_h = (w * sin + h * cos - 1e-6).ceil().max(1.0) as u32;

    let src = to_pixmap(img)?;
    let mut out = tiny_skia::Pixmap::new(out_w, out_h)
        .ok_or_else(|| CollageError::ComposeFailed("failed to allocate rotation buffer".into()))?;
    if fill[3] > 0 {
        out.fill(tiny_skia::Color::from_rgba8(fill[0], fill[1], fill[2], fill[3]));
    }

    let transform = tiny_skia::Transform::from_translate(-(w as f32) / 2.0, -(h as f32) / 2.0)
        .post_rotate(degrees as f32)
        .post_translate(out_w as f32 / 2.0, out_h as f32 / 2.0);
    let paint = tiny_skia::PixmapPaint {
        quality: tiny_skia::FilterQuality::Bilinear,
        ..Default::default()
    };
    out.draw_pixmap(0, 0, src.as_ref(), &paint, transform, None);

    Ok(from_pixmap(&out))
}

/// Composite a darkened, blurred copy of the buffer behind it, offset
/// down-right. The canvas grows by `SHADOW_MARGIN` so the blur is not cut.
pub fn drop_shadow(img: &RgbaImage, blur_sigma: f32, darken: f32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let darken = darken.clamp(0.0, 1.0);

    let mut shadow = RgbaImage::from_pixel(w + SHADOW_MARGIN, h + SHADOW_MARGIN, TRANSPARENT);
    for (x, y, p) in img.enumerate_pixels() {
        let d = |c: u8| (f32::from(c) * darken).round() as u8;
        shadow.put_pixel(
            x + SHADOW_OFFSET,
            y + SHADOW_OFFSET,
            Rgba([d(p[0]), d(p[1]), d(p[2]), p[3]]),
        );
    }

    let mut out = if blur_sigma > 0.0 {
        imageops::blur(&shadow, blur_sigma)
    } else {
        shadow
    };
    imageops::overlay(&mut out, img, 0, 0);
    out
}

/// Visible part of a `input_w`×`input_h` layer placed at (`left`, `top`) on a
/// `canvas_w`×`canvas_h` canvas, or `None` when nothing overlaps.
pub fn safe_intersect(
    canvas_w: i64,
    canvas_h: i64,
    left: i64,
    top: i64,
    input_w: i64,
    input_h: i64,
) -> Option<CanvasRect> {
    if input_w <= 0 || input_h <= 0 || canvas_w <= 0 || canvas_h <= 0 {
        return None;
    }

    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = canvas_w.min(left.saturating_add(input_w));
    let y1 = canvas_h.min(top.saturating_add(input_h));

    let w = x1.saturating_sub(x0);
    let h = y1.saturating_sub(y0);
    if w <= 0 || h <= 0 {
        return None;
    }

    Some(CanvasRect {
        left: u32::try_from(x0).ok()?,
        top: u32::try_from(y0).ok()?,
        width: u32::try_from(w).ok()?,
        height: u32::try_from(h).ok()?,
    })
}

/// Clip a layer to the canvas. Returns `None` when the layer is fully off
/// canvas; callers skip it.
pub fn crop_to_canvas(
    img: RgbaImage,
    canvas_w: u32,
    canvas_h: u32,
    left: i64,
    top: i64,
) -> Option<PlacedLayer> {
    let (in_w, in_h) = img.dimensions();
    let rect = safe_intersect(
        i64::from(canvas_w),
        i64::from(canvas_h),
        left,
        top,
        i64::from(in_w),
        i64::from(in_h),
    )?;

    let extract_left = u32::try_from(i64::from(rect.left) - left).ok()?;
    let extract_top = u32::try_from(i64::from(rect.top) - top).ok()?;

    let image = if extract_left == 0 && extract_top == 0 && rect.width == in_w && rect.height == in_h
    {
        img
    } else {
        imageops::crop_imm(&img, extract_left, extract_top, rect.width, rect.height).to_image()
    };

    Some(PlacedLayer {
        image,
        left: rect.left,
        top: rect.top,
    })
}

fn to_pixmap(img: &RgbaImage) -> Result<tiny_skia::Pixmap, CollageError> {
    let size = tiny_skia::IntSize::from_wh(img.width(), img.height())
        .ok_or_else(|| CollageError::ComposeFailed("empty raster".into()))?;

    let mut data = Vec::with_capacity(img.as_raw().len());
    for p in img.pixels() {
        let a = u16::from(p[3]);
        let premul = |c: u8| ((u16::from(c) * a + 127) / 255) as u8;
        data.extend_from_slice(&[premul(p[0]), premul(p[1]), premul(p[2]), p[3]]);
    }

    tiny_skia::Pixmap::from_vec(data, size)
        .ok_or_else(|| CollageError::ComposeFailed("failed to build pixmap".into()))
}

pub(crate) fn from_pixmap(pixmap: &tiny_skia::Pixmap) -> RgbaImage {
    let mut out = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in out.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    out
}
