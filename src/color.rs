use std::collections::{BTreeMap, BTreeSet};

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Mix, Oklch, Srgb};

use comb_calib::data::model::MetadataValue;

fn to_color32(rgb: Srgb) -> Color32 {
    let rgb = rgb.into_format::<u8>();
    Color32::from_rgb(rgb.red, rgb.green, rgb.blue)
}

/// `n` visually distinct colours with evenly spaced hues.
pub fn categorical_palette(n: usize) -> Vec<Color32> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            to_color32(Hsl::new(hue, 0.75, 0.55).into_color())
        })
        .collect()
}

/// `n` colours along a blue → red ramp, for ordered numeric values such
/// as echelle order numbers.
pub fn sequential_palette(n: usize) -> Vec<Color32> {
    let start: Oklch = Srgb::new(0.15f32, 0.35, 0.85).into_color();
    let end: Oklch = Srgb::new(0.85f32, 0.2, 0.15).into_color();
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
            to_color32(start.mix(end, t).into_color())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Color mapping: metadata value → Color32
// ---------------------------------------------------------------------------

/// Maps unique metadata values of a chosen column to colours.
#[derive(Debug, Clone)]
pub struct ColorMap {
    pub column: String,
    mapping: BTreeMap<MetadataValue, Color32>,
    default_color: Color32,
}

impl ColorMap {
    /// Numeric columns get a sequential ramp, everything else distinct hues.
    pub fn new(column: &str, unique_values: &BTreeSet<MetadataValue>) -> Self {
        let numeric = unique_values
            .iter()
            .all(|v| v.as_f64().is_some() || *v == MetadataValue::Null);
        let palette = if numeric {
            sequential_palette(unique_values.len())
        } else {
            categorical_palette(unique_values.len())
        };
        let mapping = unique_values.iter().cloned().zip(palette).collect();

        ColorMap {
            column: column.to_string(),
            mapping,
            default_color: Color32::GRAY,
        }
    }

    pub fn color_for(&self, value: &MetadataValue) -> Color32 {
        self.mapping
            .get(value)
            .copied()
            .unwrap_or(self.default_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_column_ramp() {
        let values: BTreeSet<MetadataValue> = (40..45).map(MetadataValue::Integer).collect();
        let map = ColorMap::new("order", &values);
        let first = map.color_for(&MetadataValue::Integer(40));
        let last = map.color_for(&MetadataValue::Integer(44));
        assert!(first.b() > first.r());
        assert!(last.r() > last.b());
    }

    #[test]
    fn test_unknown_value_is_gray() {
        let values = BTreeSet::from([MetadataValue::String("sci".into())]);
        let map = ColorMap::new("fiber", &values);
        assert_eq!(map.color_for(&MetadataValue::Null), Color32::GRAY);
        assert_ne!(map.color_for(&MetadataValue::String("sci".into())), Color32::GRAY);
    }

    #[test]
    fn test_palette_sizes() {
        assert!(categorical_palette(0).is_empty());
        assert_eq!(sequential_palette(1).len(), 1);
        assert_eq!(categorical_palette(7).len(), 7);
    }
}
