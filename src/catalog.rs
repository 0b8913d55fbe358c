// src/catalog.rs
// Static preset tables. Read-only; nothing in the pipeline writes to them.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StyleEntry {
    pub key: &'static str,
    pub label: &'static str,
    pub is_photorealistic: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LabeledEntry {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinerPreset {
    Photorealistic,
    Cinematic,
    Artistic,
    Vivid,
    Soft,
}

impl RefinerPreset {
    pub const ALL: [RefinerPreset; 5] = [
        RefinerPreset::Photorealistic,
        RefinerPreset::Cinematic,
        RefinerPreset::Artistic,
        RefinerPreset::Vivid,
        RefinerPreset::Soft,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RefinerPreset::Photorealistic => "photorealistic",
            RefinerPreset::Cinematic => "cinematic",
            RefinerPreset::Artistic => "artistic",
            RefinerPreset::Vivid => "vivid",
            RefinerPreset::Soft => "soft",
        }
    }
}

pub const STYLES: &[StyleEntry] = &[
    StyleEntry { key: "auto", label: "Auto", is_photorealistic: false },
    StyleEntry { key: "photorealistic", label: "Photorealistic", is_photorealistic: true },
    StyleEntry { key: "cinematic", label: "Cinematic", is_photorealistic: true },
    StyleEntry { key: "product", label: "Product Shot", is_photorealistic: true },
    StyleEntry { key: "portrait", label: "Portrait", is_photorealistic: true },
    StyleEntry { key: "architectural", label: "Architectural", is_photorealistic: true },
    StyleEntry { key: "anime", label: "Anime", is_photorealistic: false },
    StyleEntry { key: "watercolor", label: "Watercolor", is_photorealistic: false },
    StyleEntry { key: "oil_painting", label: "Oil Painting", is_photorealistic: false },
    StyleEntry { key: "3d_render", label: "3D Render", is_photorealistic: false },
    StyleEntry { key: "pixel_art", label: "Pixel Art", is_photorealistic: false },
    StyleEntry { key: "line_art", label: "Line Art", is_photorealistic: false },
    StyleEntry { key: "vintage_poster", label: "Vintage Poster", is_photorealistic: false },
];

pub const QUALITIES: &[LabeledEntry] = &[
    LabeledEntry { key: "draft", label: "Draft (fast preview)" },
    LabeledEntry { key: "standard", label: "Standard" },
    LabeledEntry { key: "premium", label: "Premium" },
    LabeledEntry { key: "ultra", label: "Ultra" },
];

pub const ASPECT_RATIOS: &[LabeledEntry] = &[
    LabeledEntry { key: "1:1", label: "Square" },
    LabeledEntry { key: "16:9", label: "Widescreen" },
    LabeledEntry { key: "9:16", label: "Story" },
    LabeledEntry { key: "4:3", label: "Classic" },
    LabeledEntry { key: "3:4", label: "Portrait" },
];

pub const CAMERA_ANGLES: &[LabeledEntry] = &[
    LabeledEntry { key: "eye_level", label: "Eye level" },
    LabeledEntry { key: "low_angle", label: "Low angle" },
    LabeledEntry { key: "high_angle", label: "High angle" },
    LabeledEntry { key: "birds_eye", label: "Bird's-eye view" },
    LabeledEntry { key: "close_up", label: "Close-up" },
];

pub const LIGHTING: &[LabeledEntry] = &[
    LabeledEntry { key: "golden_hour", label: "Golden hour" },
    LabeledEntry { key: "studio", label: "Studio softbox" },
    LabeledEntry { key: "neon", label: "Neon" },
    LabeledEntry { key: "overcast", label: "Overcast" },
    LabeledEntry { key: "rim", label: "Rim light" },
];

pub const MATERIALS: &[LabeledEntry] = &[
    LabeledEntry { key: "matte", label: "Matte" },
    LabeledEntry { key: "glossy", label: "Glossy" },
    LabeledEntry { key: "metallic", label: "Metallic" },
    LabeledEntry { key: "glass", label: "Glass" },
    LabeledEntry { key: "fabric", label: "Fabric" },
];

pub fn style(key: &str) -> Option<&'static StyleEntry> {
    STYLES.iter().find(|s| s.key == key)
}

pub fn aspect_ratio(key: &str) -> Option<&'static LabeledEntry> {
    ASPECT_RATIOS.iter().find(|a| a.key == key)
}

fn lookup(table: &'static [LabeledEntry], key: &str) -> Option<&'static LabeledEntry> {
    table.iter().find(|e| e.key == key)
}

pub fn camera_angle(key: &str) -> Option<&'static LabeledEntry> {
    lookup(CAMERA_ANGLES, key)
}

pub fn lighting(key: &str) -> Option<&'static LabeledEntry> {
    lookup(LIGHTING, key)
}

pub fn material(key: &str) -> Option<&'static LabeledEntry> {
    lookup(MATERIALS, key)
}

pub fn is_photorealistic(style_key: &str) -> bool {
    style(style_key).is_some_and(|s| s.is_photorealistic)
}

/// Serializable view of every table, served to clients.
pub fn describe() -> serde_json::Value {
    serde_json::json!({
        "styles": STYLES,
        "qualities": QUALITIES,
        "aspect_ratios": ASPECT_RATIOS,
        "refiner_presets": RefinerPreset::ALL,
        "camera_angles": CAMERA_ANGLES,
        "lighting": LIGHTING,
        "materials": MATERIALS,
    })
}
