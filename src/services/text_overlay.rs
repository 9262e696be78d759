// src/services/text_overlay.rs
//! Text layer: all text blocks are emitted as one SVG document and
//! rasterized with resvg into a transparent canvas-sized buffer.

use crate::errors::CollageError;
use crate::models::{CanvasSpec, FontFamily, TextAlign, TextBlock, TextKind};
use crate::services::image_processor::from_pixmap;
use image::RgbaImage;
use resvg::tiny_skia;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

pub const MIN_FONT_SIZE: f64 = 12.0;
pub const LINE_HEIGHT: f64 = 1.25;

const TITLE_COLOR: &str = "#0f766e";
const TEXT_COLOR: &str = "#111827";
const SANS_STACK: &str = "Arial, 'Noto Sans CJK SC', sans-serif";
const SERIF_STACK: &str = "Georgia, 'Noto Serif CJK SC', serif";

/// Rough characters-per-line used to pre-size body blocks.
const BODY_CHARS_PER_LINE: usize = 26;

static FONT_DB: LazyLock<Arc<usvg::fontdb::Database>> = LazyLock::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    log::debug!("Loaded {} font faces for text overlay", db.len());
    Arc::new(db)
});

/// A text block resolved to canvas pixels with role defaults applied.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedText {
    text: String,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    align: TextAlign,
    font_size: f64,
    color: String,
    family: FontFamily,
    rotate: f64,
    weight: u16,
}

fn resolve(block: &TextBlock, canvas: CanvasSpec) -> ResolvedText {
    let rect = block.bbox.to_pixels(canvas);
    let min_side = f64::from(canvas.min_side());
    let is_title = block.kind == TextKind::Title;

    let font_size = block
        .font_size
        .filter(|f| f.is_finite())
        .unwrap_or(if is_title { min_side * 0.07 } else { min_side * 0.032 })
        .round()
        .max(MIN_FONT_SIZE);

    let mut h = f64::from(rect.height);
    if block.kind == TextKind::Body {
        let chars = block.text.trim().chars().count();
        let approx_lines = chars.div_ceil(BODY_CHARS_PER_LINE).max(1) as f64;
        let line_height = (font_size * LINE_HEIGHT).round();
        h = h.max(approx_lines * line_height + (font_size * 0.4).round());
    }

    ResolvedText {
        text: block.text.clone(),
        x: rect.left as f64,
        y: rect.top as f64,
        w: f64::from(rect.width),
        h,
        align: block.align,
        font_size,
        color: block
            .color
            .clone()
            .unwrap_or_else(|| if is_title { TITLE_COLOR } else { TEXT_COLOR }.to_string()),
        family: block.font_family,
        rotate: if block.rotate.is_finite() { block.rotate } else { 0.0 },
        weight: if is_title { 700 } else { 500 },
    }
}

/// Width of a glyph in ems. CJK glyphs are full width, Latin is narrow.
fn char_units(ch: char) -> f64 {
    match ch {
        ' ' => 0.33,
        'A'..='Z' => 0.65,
        'a'..='z' | '0'..='9' => 0.55,
        c if is_wide(c) => 1.0,
        _ => 0.8,
    }
}

fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x115F
        | 0x2E80..=0x303E
        | 0x3041..=0x33FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6)
}

/// Greedy wrap on estimated glyph widths. Explicit newlines always break.
pub fn wrap_text(text: &str, max_width_px: f64, font_size: f64) -> Vec<String> {
    let s = text.trim();
    if s.is_empty() {
        return Vec::new();
    }

    // At least two full-width glyphs per line.
    let max_units = (max_width_px / font_size.max(1.0)).max(2.0);

    let mut lines = Vec::new();
    let mut line = String::new();
    let mut units = 0.0;

    for ch in s.chars() {
        if ch == '\n' || ch == '\r' {
            if !line.trim().is_empty() {
                lines.push(line.trim_end().to_string());
            }
            line.clear();
            units = 0.0;
            continue;
        }

        let u = char_units(ch);
        if !line.is_empty() && units + u > max_units {
            lines.push(line.trim_end().to_string());
            line.clear();
            units = 0.0;
        }

        line.push(ch);
        units += u;
    }

    if !line.trim().is_empty() {
        lines.push(line.trim_end().to_string());
    }
    lines
}

pub fn escape_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn build_overlay_svg(canvas: CanvasSpec, blocks: &[TextBlock]) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}">"#,
        canvas.width, canvas.height
    );

    for block in blocks.iter().filter(|b| !b.text.trim().is_empty()) {
        let t = resolve(block, canvas);

        let (anchor, x_anchor) = match t.align {
            TextAlign::Left => ("start", t.x),
            TextAlign::Center => ("middle", t.x + t.w / 2.0),
            TextAlign::Right => ("end", t.x + t.w),
        };
        let family = match t.family {
            FontFamily::Sans => SANS_STACK,
            FontFamily::Serif => SERIF_STACK,
        };
        let transform = if t.rotate != 0.0 {
            format!(
                r#" transform="rotate({} {} {})""#,
                t.rotate,
                t.x + t.w / 2.0,
                t.y + t.h / 2.0
            )
        } else {
            String::new()
        };

        let line_height = (t.font_size * LINE_HEIGHT).round();
        let max_lines = ((t.h / line_height.max(1.0)).floor() as usize).max(1);
        let lines = wrap_text(&t.text, t.w, t.font_size);

        let _ = write!(
            svg,
            r#"<text{} x="{}" y="{}" text-anchor="{}" fill="{}" font-family="{}" font-size="{}" font-weight="{}">"#,
            transform,
            x_anchor,
            t.y + t.font_size,
            anchor,
            escape_markup(&t.color),
            escape_markup(family),
            t.font_size,
            t.weight
        );
        for (idx, line) in lines.iter().take(max_lines).enumerate() {
            let dy = if idx == 0 { 0.0 } else { line_height };
            let _ = write!(
                svg,
                r#"<tspan x="{}" dy="{}">{}</tspan>"#,
                x_anchor,
                dy,
                escape_markup(line)
            );
        }
        svg.push_str("</text>");
    }

    svg.push_str("</svg>");
    svg
}

pub fn render_text_overlay(
    canvas: CanvasSpec,
    blocks: &[TextBlock],
) -> Result<RgbaImage, CollageError> {
    let svg = build_overlay_svg(canvas, blocks);

    let opts = usvg::Options {
        fontdb: FONT_DB.clone(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_str(&svg, &opts)?;

    let mut pixmap = tiny_skia::Pixmap::new(canvas.width, canvas.height)
        .ok_or_else(|| CollageError::ComposeFailed("failed to allocate text pixmap".into()))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    Ok(from_pixmap(&pixmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedBox;

    fn block(kind: TextKind, text: &str, align: TextAlign) -> TextBlock {
        TextBlock {
            id: "t".into(),
            kind,
            text: text.into(),
            bbox: NormalizedBox {
                x: 0.1,
                y: 0.1,
                w: 0.5,
                h: 0.1,
            },
            align,
            font_size: Some(20.0),
            color: None,
            font_family: FontFamily::Sans,
            rotate: 0.0,
        }
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_markup(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn wraps_cjk_sooner_than_latin() {
        // 100px at 20px font = 5 units per line.
        let cjk = wrap_text("海边漫步自由如风", 100.0, 20.0);
        assert_eq!(cjk, vec!["海边漫步自", "由如风"]);

        let latin = wrap_text("abcdefgh", 100.0, 20.0);
        assert_eq!(latin, vec!["abcdefgh"]);
    }

    #[test]
    fn explicit_newlines_break_and_blank_lines_drop() {
        let lines = wrap_text("one\n\ntwo", 1000.0, 20.0);
        assert_eq!(lines, vec!["one", "two"]);
        assert!(wrap_text("   ", 1000.0, 20.0).is_empty());
    }

    #[test]
    fn tiny_width_still_makes_progress() {
        let lines = wrap_text("海边漫步", 1.0, 20.0);
        assert_eq!(lines, vec!["海边", "漫步"]);
    }

    #[test]
    fn anchor_follows_alignment() {
        let canvas = CanvasSpec::new(1000, 1000);
        let svg = build_overlay_svg(canvas, &[block(TextKind::Date, "hi", TextAlign::Center)]);
        assert!(svg.contains(r#"text-anchor="middle""#));
        assert!(svg.contains(r#"x="350""#));

        let svg = build_overlay_svg(canvas, &[block(TextKind::Date, "hi", TextAlign::Right)]);
        assert!(svg.contains(r#"text-anchor="end""#));
        assert!(svg.contains(r#"x="600""#));
    }

    #[test]
    fn rotation_is_about_box_center() {
        let canvas = CanvasSpec::new(1000, 1000);
        let mut b = block(TextKind::Title, "hello", TextAlign::Left);
        b.rotate = -4.0;
        let svg = build_overlay_svg(canvas, &[b]);
        assert!(svg.contains(r#"transform="rotate(-4 350 150)""#));
        assert!(svg.contains(r#"font-weight="700""#));
        assert!(svg.contains(TITLE_COLOR));
    }

    #[test]
    fn overflowing_lines_are_truncated() {
        let canvas = CanvasSpec::new(1000, 1000);
        // Box is 100px tall; 25px line height fits four lines.
        let long = "word ".repeat(200);
        let svg = build_overlay_svg(canvas, &[block(TextKind::Date, &long, TextAlign::Left)]);
        assert_eq!(svg.matches("<tspan").count(), 4);
    }

    #[test]
    fn blank_blocks_are_skipped_and_text_is_escaped() {
        let canvas = CanvasSpec::new(500, 500);
        let svg = build_overlay_svg(
            canvas,
            &[
                block(TextKind::Body, "  ", TextAlign::Left),
                block(TextKind::Date, "a < b", TextAlign::Left),
            ],
        );
        assert_eq!(svg.matches("<text").count(), 1);
        assert!(svg.contains("a &lt; b"));
    }

    #[test]
    fn serif_family_maps_to_serif_stack() {
        let canvas = CanvasSpec::new(500, 500);
        let mut b = block(TextKind::Date, "x", TextAlign::Left);
        b.font_family = FontFamily::Serif;
        let svg = build_overlay_svg(canvas, &[b]);
        assert!(svg.contains("Georgia"));
    }

    #[test]
    fn font_size_defaults_by_role_with_floor() {
        let canvas = CanvasSpec::new(1000, 1400);
        let mut title = block(TextKind::Title, "x", TextAlign::Left);
        title.font_size = None;
        assert_eq!(resolve(&title, canvas).font_size, 70.0);

        let mut body = block(TextKind::Body, "x", TextAlign::Left);
        body.font_size = Some(3.0);
        assert_eq!(resolve(&body, canvas).font_size, MIN_FONT_SIZE);
    }

    #[test]
    fn body_blocks_grow_to_fit_text() {
        let canvas = CanvasSpec::new(1000, 1000);
        let b = block(TextKind::Body, &"a".repeat(26 * 6), TextAlign::Left);
        // six lines at 25px plus 8px padding
        assert_eq!(resolve(&b, canvas).h, 158.0);
    }

    #[test]
    fn renders_transparent_canvas_sized_layer() {
        let canvas = CanvasSpec::new(64, 48);
        let img = render_text_overlay(canvas, &[]).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
        assert!(img.pixels().all(|p| p[3] == 0));
    }
}
