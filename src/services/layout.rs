// src/services/layout.rs
//! Turns the planner's untrusted `layout` object into a `CollageLayout`.
//!
//! Repair is two-level: a `layout` that is missing, or whose `photos` /
//! `texts` are not arrays, is replaced wholesale by the fallback. Anything
//! else is repaired entry by entry and never rejected.

use crate::models::{
    AssetKind, CanvasSpec, CollageLayout, FontFamily, GeneratedAsset, NormalizedBox,
    PhotoPlacement, PhotoStyle, StickerPlacement, TextAlign, TextBlock, TextKind,
};
use crate::services::geometry::{coerce_number, normalize_box, normalize_box_value};
use serde_json::Value;

pub const DEFAULT_CORNER_RADIUS: f64 = 12.0;

/// Slots used when the plan places no stickers: `(x, y, w, h, rotate)`.
pub const DEFAULT_STICKER_SLOTS: [(f64, f64, f64, f64, f64); 2] = [
    (0.75, 0.2, 0.16, 0.16, 10.0),
    (0.57, 0.75, 0.16, 0.16, -8.0),
];

/// Text content for the fallback layout's three blocks.
#[derive(Debug, Clone, Default)]
pub struct DefaultTexts {
    pub date: String,
    pub title: String,
    pub body: String,
}

impl DefaultTexts {
    /// Date defaults to `today`; the body falls back to the prompt only
    /// when there is no title to carry the theme.
    pub fn from_request(
        prompt: &str,
        date_text: Option<&str>,
        title_text: Option<&str>,
        body_text: Option<&str>,
        today: &str,
    ) -> Self {
        let non_blank = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        let title = non_blank(title_text).unwrap_or_default();
        let body = match non_blank(body_text) {
            Some(body) => body,
            None if title.is_empty() => prompt.trim().to_string(),
            None => String::new(),
        };

        Self {
            date: non_blank(date_text).unwrap_or_else(|| today.to_string()),
            title,
            body,
        }
    }
}

fn photo_slot(
    idx: usize,
    (x, y, w, h): (f64, f64, f64, f64),
    rotate: f64,
) -> PhotoPlacement {
    PhotoPlacement {
        id: format!("p{}", idx),
        source_index: idx,
        bbox: normalize_box(x, y, w, h),
        rotate,
        style: PhotoStyle::Framed,
        corner_radius: DEFAULT_CORNER_RADIUS,
        shadow: true,
    }
}

/// Hero photo on the left, up to two small ones stacked on the right,
/// date and title on top.
pub fn fallback_layout(canvas: CanvasSpec, photo_count: usize, texts: &DefaultTexts) -> CollageLayout {
    let slots = [
        ((0.08, 0.32, 0.56, 0.52), -2.0),
        ((0.68, 0.42, 0.24, 0.22), 2.0),
        ((0.68, 0.67, 0.24, 0.22), -1.0),
    ];
    let photos = slots
        .into_iter()
        .take(photo_count)
        .enumerate()
        .map(|(idx, (bbox, rotate))| photo_slot(idx, bbox, rotate))
        .collect();

    let min_side = f64::from(canvas.min_side());
    let text = |id: &str, kind, text: &str, bbox: NormalizedBox, scale: f64, color: &str, family| {
        TextBlock {
            id: id.to_string(),
            kind,
            text: text.to_string(),
            bbox,
            align: TextAlign::Left,
            font_size: Some((min_side * scale).round()),
            color: Some(color.to_string()),
            font_family: family,
            rotate: 0.0,
        }
    };

    CollageLayout {
        canvas,
        background_style: Some("paper".to_string()),
        photos,
        texts: vec![
            text(
                "t-date",
                TextKind::Date,
                &texts.date,
                normalize_box(0.08, 0.07, 0.84, 0.08),
                0.04,
                "#1f2937",
                FontFamily::Sans,
            ),
            text(
                "t-title",
                TextKind::Title,
                &texts.title,
                normalize_box(0.08, 0.15, 0.84, 0.12),
                0.075,
                "#0f766e",
                FontFamily::Serif,
            ),
            text(
                "t-body",
                TextKind::Body,
                &texts.body,
                normalize_box(0.08, 0.26, 0.84, 0.07),
                0.032,
                "#111827",
                FontFamily::Sans,
            ),
        ],
        stickers: Vec::new(),
    }
}

/// Mirrors JavaScript truthiness, which is what planners emit against.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_or(v: Option<&Value>, default: String) -> String {
    match v {
        Some(v) if truthy(v) => stringify(v),
        _ => default,
    }
}

/// Finite number or `default`. Missing and `null` both count as absent.
fn number_or(v: Option<&Value>, default: f64) -> f64 {
    match v {
        None | Some(Value::Null) => default,
        Some(v) => coerce_number(v).filter(|f| f.is_finite()).unwrap_or(default),
    }
}

pub fn parse_photo_style(raw: Option<&Value>) -> PhotoStyle {
    match raw.and_then(Value::as_str) {
        Some("tape" | "taped") => PhotoStyle::Taped,
        Some("clean" | "plain") => PhotoStyle::Plain,
        _ => PhotoStyle::Framed,
    }
}

fn parse_text_kind(raw: Option<&Value>) -> TextKind {
    match raw.and_then(Value::as_str) {
        Some("date") => TextKind::Date,
        Some("title") => TextKind::Title,
        _ => TextKind::Body,
    }
}

fn parse_align(raw: Option<&Value>) -> TextAlign {
    match raw.and_then(Value::as_str) {
        Some("center") => TextAlign::Center,
        Some("right") => TextAlign::Right,
        _ => TextAlign::Left,
    }
}

fn parse_photo(raw: &Value, idx: usize, photo_count: usize) -> PhotoPlacement {
    let max_index = photo_count.saturating_sub(1) as f64;
    let source_index = match raw.get("sourceIndex") {
        None | Some(Value::Null) => idx as f64,
        Some(v) => coerce_number(v).filter(|f| f.is_finite()).unwrap_or(idx as f64),
    };

    PhotoPlacement {
        id: string_or(raw.get("id"), format!("p{}", idx)),
        source_index: source_index.trunc().clamp(0.0, max_index) as usize,
        bbox: normalize_box_value(raw),
        rotate: number_or(raw.get("rotate"), 0.0),
        style: parse_photo_style(raw.get("style")),
        corner_radius: number_or(raw.get("cornerRadius"), DEFAULT_CORNER_RADIUS).max(0.0),
        shadow: raw.get("shadow").map(truthy).unwrap_or(true),
    }
}

fn parse_text(raw: &Value, idx: usize) -> TextBlock {
    let font_size = match raw.get("fontSize") {
        None | Some(Value::Null) => None,
        Some(v) => coerce_number(v).filter(|f| f.is_finite()),
    };

    TextBlock {
        id: string_or(raw.get("id"), format!("t{}", idx)),
        kind: parse_text_kind(raw.get("kind")),
        text: string_or(raw.get("text"), String::new()),
        bbox: normalize_box_value(raw),
        align: parse_align(raw.get("align")),
        font_size,
        color: raw.get("color").and_then(Value::as_str).map(String::from),
        font_family: match raw.get("fontFamily").and_then(Value::as_str) {
            Some("serif") => FontFamily::Serif,
            _ => FontFamily::Sans,
        },
        rotate: number_or(raw.get("rotate"), 0.0),
    }
}

fn parse_sticker(raw: &Value) -> Option<StickerPlacement> {
    let asset_id = string_or(raw.get("elementId"), String::new());
    if asset_id.is_empty() {
        return None;
    }

    Some(StickerPlacement {
        asset_id,
        bbox: normalize_box_value(raw),
        rotate: number_or(raw.get("rotate"), 0.0),
    })
}

/// Repair the planner's `layout` against the caller's canvas and the number
/// of uploaded photos. Total: every input yields a valid layout.
pub fn normalize(
    raw_plan: &Value,
    canvas: CanvasSpec,
    photo_count: usize,
    fallback: &CollageLayout,
) -> CollageLayout {
    let Some(layout) = raw_plan.get("layout").filter(|l| l.is_object()) else {
        log::warn!("Plan has no layout object, using fallback layout");
        return fallback.clone();
    };
    let (Some(photos), Some(texts)) = (
        layout.get("photos").and_then(Value::as_array),
        layout.get("texts").and_then(Value::as_array),
    ) else {
        log::warn!("Plan layout is missing photos/texts arrays, using fallback layout");
        return fallback.clone();
    };

    let photos = photos
        .iter()
        .filter(|p| truthy(p))
        .enumerate()
        .map(|(idx, p)| parse_photo(p, idx, photo_count))
        .collect();

    let texts = texts
        .iter()
        .filter(|t| truthy(t))
        .enumerate()
        .map(|(idx, t)| parse_text(t, idx))
        .collect();

    let stickers = layout
        .get("stickers")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter(|s| truthy(s)).filter_map(parse_sticker).collect())
        .unwrap_or_default();

    CollageLayout {
        canvas,
        background_style: layout
            .get("backgroundStyle")
            .and_then(Value::as_str)
            .map(String::from),
        photos,
        texts,
        stickers,
    }
}

/// Placements for the first assets when the plan placed no stickers.
pub fn default_sticker_placements(assets: &[GeneratedAsset]) -> Vec<StickerPlacement> {
    assets
        .iter()
        .zip(DEFAULT_STICKER_SLOTS)
        .map(|(asset, (x, y, w, h, rotate))| StickerPlacement {
            asset_id: asset.id.clone(),
            bbox: normalize_box(x, y, w, h),
            rotate,
        })
        .collect()
}

/// Asset for a placement: exact id match, else the first sticker-kind asset.
pub fn resolve_asset<'a>(assets: &'a [GeneratedAsset], asset_id: &str) -> Option<&'a GeneratedAsset> {
    assets
        .iter()
        .find(|a| a.id == asset_id)
        .or_else(|| assets.iter().find(|a| a.kind == AssetKind::Sticker))
}
