// src/field_model.rs
//
// Canonical pitch geometry. The detector's keypoint id space maps to
// fixed real-world coordinates here; everything downstream treats this
// table as read-only shared configuration, constructed once and passed
// into the mapper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable table of canonical pitch landmarks, keypoint id -> metres.
///
/// Origin is the top-left corner seen from the broadcast side, x along
/// the touchline (length), y along the goal line (width).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldModel {
    length_m: f64,
    width_m: f64,
    points: HashMap<u32, [f64; 2]>,
}

impl FieldModel {
    /// Build from an explicit landmark table.
    pub fn from_table(length_m: f64, width_m: f64, table: Vec<(u32, [f64; 2])>) -> Self {
        Self {
            length_m,
            width_m,
            points: table.into_iter().collect(),
        }
    }

    /// Standard 105 m x 68 m pitch with the 27-landmark layout the field
    /// detector is trained on: corners, penalty and goal area corners,
    /// penalty spots, halfway line and centre circle extremes.
    pub fn standard() -> Self {
        const L: f64 = 105.0;
        const W: f64 = 68.0;
        // Penalty area: 16.5 m deep, spans y 13.84..54.16.
        // Goal area: 5.5 m deep, spans y 24.84..43.16.
        let table = vec![
            // Left goal line, top to bottom
            (0, [0.0, 0.0]),
            (1, [0.0, 13.84]),
            (2, [0.0, 24.84]),
            (3, [0.0, 43.16]),
            (4, [0.0, 54.16]),
            (5, [0.0, W]),
            // Left goal area and penalty area
            (6, [5.5, 24.84]),
            (7, [5.5, 43.16]),
            (8, [11.0, 34.0]), // penalty spot
            (9, [16.5, 13.84]),
            (10, [16.5, 54.16]),
            // Halfway line and centre circle (radius 9.15)
            (11, [52.5, 0.0]),
            (12, [52.5, 34.0]),
            (13, [52.5, W]),
            (14, [43.35, 34.0]),
            (15, [61.65, 34.0]),
            // Right penalty area and goal area
            (16, [88.5, 13.84]),
            (17, [88.5, 54.16]),
            (18, [94.0, 34.0]), // penalty spot
            (19, [99.5, 24.84]),
            (20, [99.5, 43.16]),
            // Right goal line, top to bottom
            (21, [L, 0.0]),
            (22, [L, 13.84]),
            (23, [L, 24.84]),
            (24, [L, 43.16]),
            (25, [L, 54.16]),
            (26, [L, W]),
        ];
        Self::from_table(L, W, table)
    }

    pub fn get(&self, id: u32) -> Option<[f64; 2]> {
        self.points.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }

    pub fn width_m(&self) -> f64 {
        self.width_m
    }

    /// Whether a projected position lies on (or within a small margin of)
    /// the pitch.
    pub fn contains(&self, xy: [f64; 2], margin_m: f64) -> bool {
        xy[0] >= -margin_m
            && xy[0] <= self.length_m + margin_m
            && xy[1] >= -margin_m
            && xy[1] <= self.width_m + margin_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_layout() {
        let field = FieldModel::standard();
        assert_eq!(field.len(), 27);
        assert_eq!(field.get(0), Some([0.0, 0.0]));
        assert_eq!(field.get(12), Some([52.5, 34.0]));
        assert_eq!(field.get(26), Some([105.0, 68.0]));
        assert_eq!(field.get(99), None);
    }

    #[test]
    fn test_symmetry() {
        let field = FieldModel::standard();
        // Penalty spots mirror around the halfway line
        let left = field.get(8).unwrap();
        let right = field.get(18).unwrap();
        assert_eq!(left[0] + right[0], 105.0);
        assert_eq!(left[1], right[1]);
    }

    #[test]
    fn test_contains() {
        let field = FieldModel::standard();
        assert!(field.contains([52.5, 34.0], 0.0));
        assert!(field.contains([-0.5, 10.0], 1.0));
        assert!(!field.contains([120.0, 34.0], 1.0));
    }
}
