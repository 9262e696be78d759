// src/services/frame.rs
//! Instant-photo frame: cover-cropped photo with rounded corners on a white
//! card, thicker at the bottom, optionally lifted by a drop shadow.

use crate::models::{PhotoPlacement, PhotoStyle};
use crate::services::image_processor::{
    FitMode, TRANSPARENT, drop_shadow, fit_resize, rounded_clip,
};
use image::imageops;
use image::{Rgba, RgbaImage};

const FRAME_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PAD_RATIO: f64 = 0.08;
const BOTTOM_PAD_RATIO: f64 = 1.8;
const SHADOW_BLUR: f32 = 12.0;
const SHADOW_DARKEN: f32 = 0.2;

pub fn frame_padding(width: u32, height: u32) -> (u32, u32) {
    let pad = (f64::from(width.min(height)) * PAD_RATIO).round();
    (pad as u32, (pad * BOTTOM_PAD_RATIO).round() as u32)
}

pub fn render_framed(
    photo: &RgbaImage,
    width: u32,
    height: u32,
    corner_radius: f64,
    with_shadow: bool,
) -> RgbaImage {
    let width = width.max(1);
    let height = height.max(1);

    let fitted = fit_resize(photo, width, height, FitMode::Cover, TRANSPARENT);
    let clipped = rounded_clip(&fitted, corner_radius.max(0.0).round());

    let (pad, bottom_pad) = frame_padding(width, height);
    let mut frame = RgbaImage::from_pixel(width + pad * 2, height + pad + bottom_pad, FRAME_COLOR);
    imageops::overlay(&mut frame, &clipped, i64::from(pad), i64::from(pad));

    if with_shadow {
        drop_shadow(&frame, SHADOW_BLUR, SHADOW_DARKEN)
    } else {
        frame
    }
}

/// Render a photo at `width`×`height` according to its presentation style.
/// `plain` skips the card entirely.
pub fn render_photo(photo: &RgbaImage, placement: &PhotoPlacement, width: u32, height: u32) -> RgbaImage {
    match placement.style {
        PhotoStyle::Plain => fit_resize(photo, width, height, FitMode::Cover, TRANSPARENT),
        PhotoStyle::Framed | PhotoStyle::Taped => render_framed(
            photo,
            width,
            height,
            placement.corner_radius,
            placement.shadow,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedBox;
    use crate::services::image_processor::SHADOW_MARGIN;

    fn photo() -> RgbaImage {
        RgbaImage::from_pixel(80, 60, Rgba([200, 30, 30, 255]))
    }

    fn placement(style: PhotoStyle, shadow: bool) -> PhotoPlacement {
        PhotoPlacement {
            id: "p0".into(),
            source_index: 0,
            bbox: NormalizedBox {
                x: 0.0,
                y: 0.0,
                w: 0.5,
                h: 0.5,
            },
            rotate: 0.0,
            style,
            corner_radius: 12.0,
            shadow,
        }
    }

    #[test]
    fn padding_is_relative_to_short_side() {
        assert_eq!(frame_padding(200, 100), (8, 14));
        assert_eq!(frame_padding(1, 1), (0, 0));
    }

    #[test]
    fn frame_adds_border_and_thicker_bottom() {
        let out = render_framed(&photo(), 200, 100, 12.0, false);
        assert_eq!(out.dimensions(), (216, 122));
        // border is opaque white
        assert_eq!(*out.get_pixel(2, 2), FRAME_COLOR);
        assert_eq!(*out.get_pixel(100, 118), FRAME_COLOR);
        // photo centre shows through
        assert!(out.get_pixel(108, 58)[0] > 150);
    }

    #[test]
    fn rounded_corners_reveal_the_card() {
        let out = render_framed(&photo(), 200, 100, 30.0, false);
        // photo's top-left corner pixel is clipped, so the white card shows
        let p = out.get_pixel(8, 8);
        assert!(p[1] > 200, "expected card colour, got {:?}", p);
    }

    #[test]
    fn shadow_grows_the_layer() {
        let out = render_framed(&photo(), 200, 100, 12.0, true);
        assert_eq!(out.dimensions(), (216 + SHADOW_MARGIN, 122 + SHADOW_MARGIN));
        // shadow peeks out to the right of the card
        let p = out.get_pixel(225, 70);
        assert!(p[3] > 100 && p[0] < 100, "expected shadow, got {:?}", p);
    }

    #[test]
    fn plain_style_is_a_bare_cover_crop() {
        let out = render_photo(&photo(), &placement(PhotoStyle::Plain, true), 50, 50);
        assert_eq!(out.dimensions(), (50, 50));
        assert_eq!(out.get_pixel(0, 0)[3], 255);

        let taped = render_photo(&photo(), &placement(PhotoStyle::Taped, false), 50, 50);
        assert_eq!(taped.dimensions(), (58, 61));
    }
}
