use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixels. Serialised as `[x, y, w, h]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x, y, w, h]: [f32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x, bbox.y, bbox.w, bbox.h]
    }
}

/// One classified bounding box produced by a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    /// Confidence in `0..=1`.
    pub score: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
        Self {
            class: class.into(),
            score,
            bbox: bbox.into(),
        }
    }

    /// Score as a whole percentage.
    pub fn percent(&self) -> u32 {
        (self.score * 100.0).round().max(0.0) as u32
    }

    /// Overlay label, e.g. `person 90%`.
    pub fn label(&self) -> String {
        format!("{} {}%", self.class, self.percent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_bbox_as_array() {
        let det = Detection::new("person", 0.9, [0.0, 0.0, 100.0, 100.0]);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"class": "person", "score": 0.9f32, "bbox": [0.0, 0.0, 100.0, 100.0]})
        );
        let back: Detection = serde_json::from_value(json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn label_rounds_the_score() {
        assert_eq!(Detection::new("cat", 0.456, [0.0; 4]).label(), "cat 46%");
        assert_eq!(Detection::new("dog", 1.0, [0.0; 4]).label(), "dog 100%");
    }
}
