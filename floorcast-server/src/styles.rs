//! Style preset catalog served under `/api/styles`.
//!
//! Presets come from a JSON object keyed by style id. A second, staging file
//! may add presets that resolve by id but stay out of every listing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::{debug, error, info};

const DEFAULT_CATEGORY: &str = "Uncategorized";
const DEFAULT_LIGHTING: &str = "Standard";
const DEFAULT_VIEWPOINT: &str = "Top-Down";
const PRESET_NEGATIVE_PROMPT: &str = "text, watermark, low quality, blurred, distorted structure, swapping furniture, wrong room types, extra walls, missing doors";
const RECOMMENDED_CONTROLNET_WEIGHT: f64 = 0.9;
const RECOMMENDED_GUIDANCE_SCALE: f64 = 7.5;

/// One entry of the style data file, as written by the frontend tooling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StyleEntry {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    generated_prompt: Option<String>,
    active_persona: Option<String>,
    style_modifiers: Vec<String>,
    materials_list: Vec<String>,
    lighting_style: Option<String>,
    lighting_engine: Option<String>,
    hex_palette: Vec<String>,
    color_palette_full: Option<Map<String, Value>>,
    viewpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StylePreset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub base_prompt: String,
    pub persona: String,
    pub style_modifiers: Vec<String>,
    pub materials_list: Vec<String>,
    pub lighting_setup: String,
    pub color_palette: Map<String, Value>,
    pub negative_prompt: String,
    pub lighting: String,
    pub viewpoint: String,
    pub recommended_controlnet_weight: f64,
    pub recommended_guidance_scale: f64,
    pub tags: Vec<String>,
    #[serde(skip)]
    pub staging: bool,
}

impl StylePreset {
    fn from_entry(id: String, entry: StyleEntry, staging: bool) -> Self {
        let lighting = entry
            .lighting_style
            .or(entry.lighting_engine)
            .unwrap_or_else(|| DEFAULT_LIGHTING.to_string());
        let category = entry
            .category
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let color_palette = entry.color_palette_full.unwrap_or_else(|| {
            entry
                .hex_palette
                .into_iter()
                .enumerate()
                .map(|(i, color)| (format!("color_{i}"), Value::String(color)))
                .collect()
        });

        Self {
            name: entry.title.unwrap_or_else(|| id.clone()),
            id,
            description: entry.description.unwrap_or_default(),
            tags: vec![category.clone()],
            category,
            base_prompt: entry.generated_prompt.unwrap_or_default(),
            persona: entry.active_persona.unwrap_or_default(),
            style_modifiers: entry.style_modifiers,
            materials_list: entry.materials_list,
            lighting_setup: lighting.clone(),
            color_palette,
            negative_prompt: PRESET_NEGATIVE_PROMPT.to_string(),
            lighting,
            viewpoint: entry
                .viewpoint
                .unwrap_or_else(|| DEFAULT_VIEWPOINT.to_string()),
            recommended_controlnet_weight: RECOMMENDED_CONTROLNET_WEIGHT,
            recommended_guidance_scale: RECOMMENDED_GUIDANCE_SCALE,
            staging,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleCategory {
    pub name: String,
    pub description: String,
    /// Ids of the public presets in this category.
    pub styles: Vec<String>,
}

impl StyleCategory {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("{name} Styles"),
            styles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StyleCatalog {
    presets: BTreeMap<String, StylePreset>,
    categories: BTreeMap<String, StyleCategory>,
}

impl StyleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the public file, then the staging file. Missing files are
    /// skipped; a file that cannot be read or parsed is logged and skipped.
    pub fn load(styles_file: &Path, staging_file: Option<&Path>) -> Self {
        let mut catalog = Self::new();
        let files = std::iter::once((styles_file, false))
            .chain(staging_file.map(|path| (path, true)));
        for (path, staging) in files {
            if !path.is_file() {
                debug!("No style file at {}", path.display());
                continue;
            }
            if let Err(e) = catalog.merge_file(path, staging) {
                error!("Failed to load styles from {}: {:#}", path.display(), e);
            }
        }
        info!(
            "Loaded {} style presets ({} public)",
            catalog.presets.len(),
            catalog.public().count()
        );
        catalog
    }

    fn merge_file(&mut self, path: &Path, staging: bool) -> Result<()> {
        let raw = fs::read_to_string(path).context("failed to read style file")?;
        self.merge_json(&raw, staging)
    }

    /// Adds every entry of a JSON object keyed by style id. Later entries
    /// replace earlier ones with the same id.
    pub fn merge_json(&mut self, raw: &str, staging: bool) -> Result<()> {
        let entries: BTreeMap<String, StyleEntry> =
            serde_json::from_str(raw).context("invalid style data")?;
        for (id, entry) in entries {
            let preset = StylePreset::from_entry(id.clone(), entry, staging);
            let category = self
                .categories
                .entry(preset.category.clone())
                .or_insert_with(|| StyleCategory::new(&preset.category));
            if !staging && !category.styles.contains(&id) {
                category.styles.push(id.clone());
            }
            self.presets.insert(id, preset);
        }
        Ok(())
    }

    /// Any preset, staging ones included.
    pub fn get(&self, id: &str) -> Option<&StylePreset> {
        self.presets.get(id)
    }

    pub fn public(&self) -> impl Iterator<Item = &StylePreset> {
        self.presets.values().filter(|preset| !preset.staging)
    }

    pub fn categories(&self) -> &BTreeMap<String, StyleCategory> {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&StyleCategory> {
        self.categories.get(name)
    }

    /// Public presets of a category, in listing order.
    pub fn in_category(&self, name: &str) -> Vec<&StylePreset> {
        self.category(name)
            .map(|category| {
                category
                    .styles
                    .iter()
                    .filter_map(|id| self.presets.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLIC: &str = r##"{
        "blueprint": {
            "title": "Blueprint",
            "category": "Technical",
            "generated_prompt": "cyanotype floor plan",
            "style_modifiers": ["white lines"],
            "hex_palette": ["#0000ff", "#ffffff"],
            "lighting_engine": "Flat"
        },
        "sketch": {}
    }"##;

    const STAGING: &str = r##"{
        "draft": {"title": "Draft", "category": "User Created"},
        "neon": {"category": "Technical", "color_palette_full": {"walls": "#ff00ff"}}
    }"##;

    fn catalog() -> StyleCatalog {
        let mut catalog = StyleCatalog::new();
        catalog.merge_json(PUBLIC, false).unwrap();
        catalog.merge_json(STAGING, true).unwrap();
        catalog
    }

    #[test]
    fn entry_fields_map_onto_preset() {
        let catalog = catalog();
        let preset = catalog.get("blueprint").unwrap();
        assert_eq!(preset.name, "Blueprint");
        assert_eq!(preset.base_prompt, "cyanotype floor plan");
        assert_eq!(preset.lighting, "Flat");
        assert_eq!(preset.lighting_setup, "Flat");
        assert_eq!(preset.color_palette["color_1"], "#ffffff");
        assert_eq!(preset.tags, vec!["Technical".to_string()]);
        assert_eq!(preset.recommended_controlnet_weight, 0.9);
    }

    #[test]
    fn empty_entry_gets_defaults() {
        let catalog = catalog();
        let preset = catalog.get("sketch").unwrap();
        assert_eq!(preset.name, "sketch");
        assert_eq!(preset.category, "Uncategorized");
        assert_eq!(preset.lighting, "Standard");
        assert_eq!(preset.viewpoint, "Top-Down");
        assert!(preset.color_palette.is_empty());
    }

    #[test]
    fn staging_presets_are_hidden_from_listings() {
        let catalog = catalog();
        let ids: Vec<_> = catalog.public().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["blueprint", "sketch"]);
        assert!(catalog.get("draft").unwrap().staging);
        assert_eq!(
            catalog.get("neon").unwrap().color_palette["walls"],
            "#ff00ff"
        );

        // Staging-only categories exist but list nothing.
        assert!(catalog.category("User Created").unwrap().styles.is_empty());
        let technical: Vec<_> = catalog
            .in_category("Technical")
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(technical, ["blueprint"]);
    }

    #[test]
    fn unknown_category_is_empty() {
        assert!(catalog().in_category("Baroque").is_empty());
        assert!(catalog().category("Baroque").is_none());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut catalog = StyleCatalog::new();
        assert!(catalog.merge_json("[1, 2]", false).is_err());
        assert!(catalog.public().next().is_none());
    }

    #[test]
    fn load_skips_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let styles = dir.path().join("style_prompts.json");
        let broken = dir.path().join("staging.json");
        fs::write(&styles, PUBLIC).unwrap();
        fs::write(&broken, "{ not json").unwrap();

        let catalog = StyleCatalog::load(&styles, Some(&broken));
        assert_eq!(catalog.public().count(), 2);

        let catalog = StyleCatalog::load(&dir.path().join("absent.json"), None);
        assert!(catalog.public().next().is_none());
    }
}
