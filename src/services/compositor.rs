// src/services/compositor.rs
//! Flattens background, photos, stickers and text into the final PNG.
//!
//! Z-order is fixed: background, then photos, then stickers, then the text
//! layer. Every layer is clipped to the canvas before it is merged.

use crate::errors::CollageError;
use crate::models::{CollageLayout, GeneratedAsset, StickerPlacement};
use crate::services::frame::render_photo;
use crate::services::image_processor::{
    FitMode, PlacedLayer, TRANSPARENT, crop_to_canvas, decode, encode_png, fit_resize, rotate,
};
use crate::services::layout::{default_sticker_placements, resolve_asset};
use crate::services::text_overlay::render_text_overlay;
use image::{RgbaImage, imageops};
use std::borrow::Cow;

/// Sticker placements to draw: the planned ones, else defaults for the first
/// generated assets.
pub fn sticker_placements<'a>(
    layout: &'a CollageLayout,
    assets: &[GeneratedAsset],
) -> Cow<'a, [StickerPlacement]> {
    if layout.stickers.is_empty() {
        Cow::Owned(default_sticker_placements(assets))
    } else {
        Cow::Borrowed(&layout.stickers)
    }
}

fn place(
    img: RgbaImage,
    degrees: f64,
    layout: &CollageLayout,
    left: i64,
    top: i64,
) -> Result<Option<PlacedLayer>, CollageError> {
    let img = if degrees != 0.0 {
        rotate(&img, degrees, TRANSPARENT)?
    } else {
        img
    };
    Ok(crop_to_canvas(
        img,
        layout.canvas.width,
        layout.canvas.height,
        left,
        top,
    ))
}

fn photo_layers(
    layout: &CollageLayout,
    photos: &[RgbaImage],
) -> Result<Vec<PlacedLayer>, CollageError> {
    let mut layers = Vec::new();

    for p in &layout.photos {
        let Some(src) = photos.get(p.source_index) else {
            log::debug!("Photo {} has no source image, skipping", p.id);
            continue;
        };
        let rect = p.bbox.to_pixels(layout.canvas);
        if rect.width == 0 || rect.height == 0 {
            continue;
        }

        let rendered = render_photo(src, p, rect.width, rect.height);
        match place(rendered, p.rotate, layout, rect.left, rect.top)? {
            Some(layer) => layers.push(layer),
            None => log::debug!("Photo {} falls outside the canvas, skipping", p.id),
        }
    }

    Ok(layers)
}

fn sticker_layers(
    layout: &CollageLayout,
    assets: &[GeneratedAsset],
) -> Result<Vec<PlacedLayer>, CollageError> {
    let mut layers = Vec::new();

    for s in sticker_placements(layout, assets).iter() {
        let Some(asset) = resolve_asset(assets, &s.asset_id) else {
            log::debug!("No asset for sticker {}, skipping", s.asset_id);
            continue;
        };
        let rect = s.bbox.to_pixels(layout.canvas);
        if rect.width == 0 || rect.height == 0 {
            continue;
        }

        let art = match decode(&asset.image_bytes) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Sticker asset {} is not a readable image: {}", asset.id, e);
                continue;
            }
        };
        let fitted = fit_resize(&art, rect.width, rect.height, FitMode::Inside, TRANSPARENT);
        if let Some(layer) = place(fitted, s.rotate, layout, rect.left, rect.top)? {
            layers.push(layer);
        }
    }

    Ok(layers)
}

/// All foreground layers in paint order, already clipped to the canvas.
pub fn build_layers(
    layout: &CollageLayout,
    photos: &[RgbaImage],
    assets: &[GeneratedAsset],
) -> Result<Vec<PlacedLayer>, CollageError> {
    let mut layers = photo_layers(layout, photos)?;
    layers.extend(sticker_layers(layout, assets)?);

    let text = render_text_overlay(layout.canvas, &layout.texts)?;
    layers.extend(crop_to_canvas(
        text,
        layout.canvas.width,
        layout.canvas.height,
        0,
        0,
    ));

    Ok(layers)
}

/// Compose the final collage and encode it as PNG.
pub fn compose(
    background: &[u8],
    layout: &CollageLayout,
    photos: &[RgbaImage],
    assets: &[GeneratedAsset],
) -> Result<Vec<u8>, CollageError> {
    let bg = decode(background)?;
    let mut canvas = fit_resize(
        &bg,
        layout.canvas.width,
        layout.canvas.height,
        FitMode::Cover,
        TRANSPARENT,
    );

    let layers = build_layers(layout, photos, assets)?;
    log::debug!(
        "Compositing {} layers onto {}x{} canvas",
        layers.len(),
        layout.canvas.width,
        layout.canvas.height
    );
    for layer in &layers {
        imageops::overlay(
            &mut canvas,
            &layer.image,
            i64::from(layer.left),
            i64::from(layer.top),
        );
    }

    encode_png(&canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AssetKind, CanvasSpec, NormalizedBox, PhotoPlacement, PhotoStyle, TextAlign, TextBlock,
        TextKind, FontFamily,
    };
    use image::Rgba;

    fn png(w: u32, h: u32, color: [u8; 4]) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(w, h, Rgba(color))).unwrap()
    }

    fn bbox(x: f64, y: f64, w: f64, h: f64) -> NormalizedBox {
        NormalizedBox { x, y, w, h }
    }

    fn layout(canvas: CanvasSpec) -> CollageLayout {
        CollageLayout {
            canvas,
            background_style: None,
            photos: vec![],
            texts: vec![],
            stickers: vec![],
        }
    }

    fn photo(source_index: usize, b: NormalizedBox, rotate: f64) -> PhotoPlacement {
        PhotoPlacement {
            id: format!("p{}", source_index),
            source_index,
            bbox: b,
            rotate,
            style: PhotoStyle::Plain,
            corner_radius: 0.0,
            shadow: false,
        }
    }

    fn asset(id: &str, kind: AssetKind) -> GeneratedAsset {
        GeneratedAsset {
            id: id.into(),
            kind,
            image_bytes: png(32, 32, [0, 200, 0, 255]),
            source_prompt: "leaf".into(),
        }
    }

    #[test]
    fn edge_layers_are_clipped_to_the_canvas() {
        let mut l = layout(CanvasSpec::new(100, 100));
        // Rotation grows the layer; the box itself is at the far edge.
        l.photos.push(photo(0, bbox(0.96, 0.96, 0.02, 0.02), 45.0));
        l.stickers.push(StickerPlacement {
            asset_id: "st".into(),
            bbox: bbox(0.96, 0.96, 0.02, 0.02),
            rotate: 0.0,
        });
        let photos = vec![RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))];
        let assets = vec![asset("st", AssetKind::Sticker)];

        let layers = build_layers(&l, &photos, &assets).unwrap();
        for layer in &layers {
            assert!(layer.left + layer.image.width() <= 100);
            assert!(layer.top + layer.image.height() <= 100);
        }
    }

    #[test]
    fn layers_past_the_right_edge_are_dropped() {
        let mut l = layout(CanvasSpec::new(100, 100));
        // left = canvas width + 10
        l.photos.push(photo(0, bbox(1.1, 0.2, 0.3, 0.3), 0.0));
        l.stickers.push(StickerPlacement {
            asset_id: "st".into(),
            bbox: bbox(1.1, 0.5, 0.2, 0.2),
            rotate: 0.0,
        });
        let photos = vec![RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))];
        let assets = vec![asset("st", AssetKind::Sticker)];

        assert!(photo_layers(&l, &photos).unwrap().is_empty());
        assert!(sticker_layers(&l, &assets).unwrap().is_empty());

        // Only the full-canvas text layer remains.
        let layers = build_layers(&l, &photos, &assets).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!((layers[0].left, layers[0].top), (0, 0));
        assert_eq!(layers[0].image.dimensions(), (100, 100));
    }

    #[test]
    fn missing_photo_source_is_skipped() {
        let mut l = layout(CanvasSpec::new(100, 100));
        l.photos.push(photo(0, bbox(0.1, 0.1, 0.3, 0.3), 0.0));
        let layers = photo_layers(&l, &[]).unwrap();
        assert!(layers.is_empty());
    }

    #[test]
    fn planned_stickers_take_precedence_over_defaults() {
        let mut l = layout(CanvasSpec::new(100, 100));
        let assets = vec![asset("a", AssetKind::Sticker), asset("b", AssetKind::Sticker)];
        assert_eq!(sticker_placements(&l, &assets).len(), 2);

        l.stickers.push(StickerPlacement {
            asset_id: "b".into(),
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
            rotate: 0.0,
        });
        let placements = sticker_placements(&l, &assets);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].asset_id, "b");
    }

    #[test]
    fn unreadable_sticker_is_skipped() {
        let mut l = layout(CanvasSpec::new(100, 100));
        l.stickers.push(StickerPlacement {
            asset_id: "bad".into(),
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
            rotate: 0.0,
        });
        let assets = vec![GeneratedAsset {
            id: "bad".into(),
            kind: AssetKind::Sticker,
            image_bytes: b"not an image".to_vec(),
            source_prompt: String::new(),
        }];
        assert!(sticker_layers(&l, &assets).unwrap().is_empty());
    }

    #[test]
    fn dangling_sticker_without_sticker_assets_is_skipped() {
        let mut l = layout(CanvasSpec::new(100, 100));
        l.stickers.push(StickerPlacement {
            asset_id: "ghost".into(),
            bbox: bbox(0.1, 0.1, 0.2, 0.2),
            rotate: 0.0,
        });
        let assets = vec![asset("deco", AssetKind::Decoration)];
        assert!(sticker_layers(&l, &assets).unwrap().is_empty());
    }

    #[test]
    fn output_matches_canvas_and_layers_land_in_place() {
        let mut l = layout(CanvasSpec::new(120, 80));
        l.photos.push(photo(0, bbox(0.5, 0.5, 0.25, 0.25), 0.0));
        l.texts.push(TextBlock {
            id: "t0".into(),
            kind: TextKind::Date,
            text: "2024-06-01".into(),
            bbox: bbox(0.05, 0.05, 0.5, 0.2),
            align: TextAlign::Left,
            font_size: Some(12.0),
            color: None,
            font_family: FontFamily::Sans,
            rotate: 0.0,
        });

        let background = png(300, 300, [240, 240, 230, 255]);
        let photos = vec![RgbaImage::from_pixel(40, 40, Rgba([10, 20, 200, 255]))];
        let out = compose(&background, &l, &photos, &[]).unwrap();

        let img = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (120, 80));
        // photo covers (60..90, 40..60)
        assert!(img.get_pixel(75, 50)[2] > 150);
        assert!((235..=245).contains(&img.get_pixel(110, 75)[0]));
    }

    #[test]
    fn undecodable_background_fails_compose() {
        let l = layout(CanvasSpec::new(10, 10));
        let err = compose(b"garbage", &l, &[], &[]).unwrap_err();
        assert_eq!(err.code(), "COMPOSE_FAILED");
    }
}
