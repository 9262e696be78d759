// src/services/geometry.rs
//! Fractional-box math shared by the layout normalizer and the compositor.
//!
//! Everything here works in the 0..1 canvas space and is total: any input,
//! including missing fields, `NaN` and infinities, produces a usable box.

use crate::models::NormalizedBox;
use serde_json::Value;

pub const MIN_EXTENT: f64 = 0.02;
pub const MAX_EDGE: f64 = 0.98;

const DEFAULT_X: f64 = 0.0;
const DEFAULT_Y: f64 = 0.0;
const DEFAULT_W: f64 = 0.3;
const DEFAULT_H: f64 = 0.3;

pub fn clamp_unit(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

/// Clamp a raw box. `w`/`h` are clamped against the already-clamped `x`/`y`,
/// so the far edge never passes `MAX_EDGE`. The origin stops `MIN_EXTENT`
/// short of the edge so the minimum extent still fits.
pub fn normalize_box(x: f64, y: f64, w: f64, h: f64) -> NormalizedBox {
    let x = clamp_unit(x).min(MAX_EDGE - MIN_EXTENT);
    let y = clamp_unit(y).min(MAX_EDGE - MIN_EXTENT);
    let w = clamp_unit(w);
    let h = clamp_unit(h);

    NormalizedBox {
        x,
        y,
        w: (MAX_EDGE - x).min(w).max(MIN_EXTENT),
        h: (MAX_EDGE - y).min(h).max(MIN_EXTENT),
    }
}

/// Read `x`, `y`, `w`, `h` from an arbitrary JSON value.
pub fn normalize_box_value(raw: &Value) -> NormalizedBox {
    let field = |name: &str, default: f64| match raw.get(name) {
        None | Some(Value::Null) => default,
        Some(v) => coerce_number(v).unwrap_or(f64::NAN),
    };

    normalize_box(
        field("x", DEFAULT_X),
        field("y", DEFAULT_Y),
        field("w", DEFAULT_W),
        field("h", DEFAULT_H),
    )
}

/// Loose numeric coercion for model output: numbers, numeric strings and
/// booleans. `None` for anything else.
pub fn coerce_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPS: f64 = 1e-9;

    fn assert_invariant(b: &NormalizedBox) {
        assert!((0.0..=1.0).contains(&b.x), "x out of range: {:?}", b);
        assert!((0.0..=1.0).contains(&b.y), "y out of range: {:?}", b);
        assert!(b.w >= MIN_EXTENT - EPS, "w too small: {:?}", b);
        assert!(b.h >= MIN_EXTENT - EPS, "h too small: {:?}", b);
        assert!(b.x + b.w <= MAX_EDGE + EPS, "x+w past edge: {:?}", b);
        assert!(b.y + b.h <= MAX_EDGE + EPS, "y+h past edge: {:?}", b);
    }

    #[test]
    fn clamp_unit_handles_non_finite() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(f64::INFINITY), 0.0);
        assert_eq!(clamp_unit(f64::NEG_INFINITY), 0.0);
        assert_eq!(clamp_unit(-3.0), 0.0);
        assert_eq!(clamp_unit(7.0), 1.0);
        assert_eq!(clamp_unit(0.4), 0.4);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let b = normalize_box_value(&json!({}));
        assert_eq!(
            b,
            NormalizedBox {
                x: 0.0,
                y: 0.0,
                w: 0.3,
                h: 0.3
            }
        );
        let b = normalize_box_value(&Value::Null);
        assert_eq!(b.w, 0.3);
    }

    #[test]
    fn width_is_clamped_against_final_x() {
        let b = normalize_box(0.9, 0.5, 0.5, 0.2);
        assert!((b.w - 0.08).abs() < EPS);
        assert!((b.x + b.w - MAX_EDGE).abs() < EPS);
    }

    #[test]
    fn box_invariant_holds_for_hostile_inputs() {
        let samples = [
            -1.0,
            0.0,
            0.01,
            0.5,
            0.97,
            0.98,
            0.99,
            1.0,
            2.0,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for &x in &samples {
            for &y in &samples {
                for &w in &samples {
                    for &h in &samples {
                        assert_invariant(&normalize_box(x, y, w, h));
                    }
                }
            }
        }
    }

    #[test]
    fn json_values_are_coerced() {
        let b = normalize_box_value(&json!({"x": "0.25", "y": "abc", "w": true, "h": [1]}));
        assert_eq!(b.x, 0.25);
        assert_eq!(b.y, 0.0);
        assert!((b.w - (MAX_EDGE - 0.25)).abs() < EPS);
        assert_eq!(b.h, MIN_EXTENT);
        assert_invariant(&b);
    }

    #[test]
    fn normalization_is_idempotent() {
        let cases = [
            (0.9, 0.95, 0.6, 0.6),
            (-1.0, 2.0, f64::NAN, 0.001),
            (0.1, 0.2, 0.3, 0.4),
            (0.999, 0.999, 1.0, 1.0),
        ];
        for (x, y, w, h) in cases {
            let once = normalize_box(x, y, w, h);
            let twice = normalize_box(once.x, once.y, once.w, once.h);
            assert_eq!(once, twice);
        }
    }
}
