// src/models.rs
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CANVAS_WIDTH: u32 = 1024;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1400;
pub const MAX_UPLOADS: usize = 3;
pub const MAX_PLAN_ELEMENTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
}

impl CanvasSpec {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Logical size request handed to image providers, e.g. `1024x1400`.
    pub fn size_hint(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self::new(DEFAULT_CANVAS_WIDTH, DEFAULT_CANVAS_HEIGHT)
    }
}

/// Fractional box inside the canvas, see `geometry::normalize_box`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i64,
    pub top: i64,
    pub width: u32,
    pub height: u32,
}

impl NormalizedBox {
    pub fn to_pixels(&self, canvas: CanvasSpec) -> PixelRect {
        let cw = f64::from(canvas.width);
        let ch = f64::from(canvas.height);
        PixelRect {
            left: (self.x * cw).round() as i64,
            top: (self.y * ch).round() as i64,
            width: (self.w * cw).round().max(0.0) as u32,
            height: (self.h * ch).round().max(0.0) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStyle {
    Framed,
    Taped,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPlacement {
    pub id: String,
    pub source_index: usize,
    #[serde(flatten)]
    pub bbox: NormalizedBox,
    pub rotate: f64,
    pub style: PhotoStyle,
    pub corner_radius: f64,
    pub shadow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Date,
    Title,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFamily {
    Sans,
    Serif,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: String,
    pub kind: TextKind,
    pub text: String,
    #[serde(flatten)]
    pub bbox: NormalizedBox,
    pub align: TextAlign,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub font_family: FontFamily,
    pub rotate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerPlacement {
    #[serde(rename = "elementId")]
    pub asset_id: String,
    #[serde(flatten)]
    pub bbox: NormalizedBox,
    pub rotate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollageLayout {
    pub canvas: CanvasSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_style: Option<String>,
    pub photos: Vec<PhotoPlacement>,
    pub texts: Vec<TextBlock>,
    pub stickers: Vec<StickerPlacement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Sticker,
    Frame,
    Decoration,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Sticker => "sticker",
            AssetKind::Frame => "frame",
            AssetKind::Decoration => "decoration",
        }
    }
}

/// Decorative element requested by the plan; drives one sticker image call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanElement {
    pub id: Option<String>,
    pub kind: AssetKind,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedAsset {
    pub id: String,
    pub kind: AssetKind,
    pub image_bytes: Vec<u8>,
    pub source_prompt: String,
}

/// The planning provider's answer, with its free-text fields pulled out.
/// `raw` keeps the untouched payload for the layout normalizer.
#[derive(Debug, Clone)]
pub struct RawPlan {
    pub style: Option<String>,
    pub palette: Vec<String>,
    pub background_prompt: Option<String>,
    pub elements: Vec<PlanElement>,
    pub notes: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollagePlan {
    pub style: String,
    pub palette: Vec<String>,
    pub background_prompt: String,
    pub elements: Vec<PlanElement>,
    pub layout: CollageLayout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub final_image: Vec<u8>,
    pub background_image: Vec<u8>,
    pub assets: Vec<GeneratedAsset>,
    pub plan: CollagePlan,
    pub resolved_style_prompt: String,
}

impl GenerationResult {
    pub fn layout(&self) -> &CollageLayout {
        &self.plan.layout
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub provider: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
    pub template_id: Option<String>,
    pub date_text: Option<String>,
    pub title_text: Option<String>,
    pub body_text: Option<String>,
    pub files: Vec<UploadedFile>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub id: String,
    pub kind: AssetKind,
    pub base64: String,
    pub prompt: String,
}

/// Wire shape of a finished generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub image_base64: String,
    pub background_base64: String,
    pub assets: Vec<AssetResponse>,
    pub plan: CollagePlan,
    pub resolved_style_prompt: String,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        use base64::{Engine as _, engine::general_purpose};

        Self {
            image_base64: general_purpose::STANDARD.encode(&result.final_image),
            background_base64: general_purpose::STANDARD.encode(&result.background_image),
            assets: result
                .assets
                .into_iter()
                .map(|a| AssetResponse {
                    base64: general_purpose::STANDARD.encode(&a.image_bytes),
                    id: a.id,
                    kind: a.kind,
                    prompt: a.source_prompt,
                })
                .collect(),
            plan: result.plan,
            resolved_style_prompt: result.resolved_style_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_resolves_against_canvas() {
        let b = NormalizedBox {
            x: 0.5,
            y: 0.25,
            w: 0.1,
            h: 0.2,
        };
        let rect = b.to_pixels(CanvasSpec::new(1000, 800));
        assert_eq!(
            rect,
            PixelRect {
                left: 500,
                top: 200,
                width: 100,
                height: 160
            }
        );
    }

    #[test]
    fn layout_serializes_with_plan_field_names() {
        let layout = CollageLayout {
            canvas: CanvasSpec::default(),
            background_style: None,
            photos: vec![PhotoPlacement {
                id: "p0".into(),
                source_index: 0,
                bbox: NormalizedBox {
                    x: 0.1,
                    y: 0.1,
                    w: 0.3,
                    h: 0.3,
                },
                rotate: -2.0,
                style: PhotoStyle::Framed,
                corner_radius: 12.0,
                shadow: true,
            }],
            texts: vec![],
            stickers: vec![StickerPlacement {
                asset_id: "st-1".into(),
                bbox: NormalizedBox {
                    x: 0.7,
                    y: 0.2,
                    w: 0.16,
                    h: 0.16,
                },
                rotate: 10.0,
            }],
        };
        let v = serde_json::to_value(&layout).unwrap();
        assert_eq!(v["photos"][0]["sourceIndex"], 0);
        assert_eq!(v["photos"][0]["style"], "framed");
        assert_eq!(v["photos"][0]["cornerRadius"], 12.0);
        assert_eq!(v["photos"][0]["x"], 0.1);
        assert_eq!(v["stickers"][0]["elementId"], "st-1");
        assert!(v.get("backgroundStyle").is_none());
    }
}
