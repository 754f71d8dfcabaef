// src/grounding.rs
// Extraction of <ref>label</ref><box>(x1,y1),(x2,y2)</box> annotations
// that vision models embed in their replies

use once_cell::sync::Lazy;
use regex::Regex;

static BOX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<ref>\s*(.*?)\s*</ref><box>\s*\((\d+),(\d+)\),\((\d+),(\d+)\)\s*</box>")
        .expect("grounding pattern is valid")
});

static MARKUP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<ref>\s*(.*?)\s*</ref>(?:<box>[^<]*</box>)?").expect("markup pattern is valid")
});

/// Labeled rectangle, corners in the model's coordinate space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingBox {
    pub label: String,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl GroundingBox {
    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }
}

/// All boxes in `text`, in order of appearance
pub fn extract_boxes(text: &str) -> Vec<GroundingBox> {
    BOX_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            Some(GroundingBox {
                label: caps[1].trim().to_string(),
                x1: caps[2].parse().ok()?,
                y1: caps[3].parse().ok()?,
                x2: caps[4].parse().ok()?,
                y2: caps[5].parse().ok()?,
            })
        })
        .collect()
}

/// `text` with annotation markup removed and labels left in place
pub fn strip_annotations(text: &str) -> String {
    MARKUP_PATTERN.replace_all(text, " $1").trim().to_string()
}
