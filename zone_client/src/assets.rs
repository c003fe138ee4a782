//! Deferred asset assignment.
//!
//! Remote entities ask for their visual by model key. The first request for
//! a key starts exactly one load and leaves a "loading" sentinel behind;
//! later requests for the same key just wait. When the load completes the
//! caller attaches a clone to every entity that currently wants that key,
//! including entities created while the load was in flight.
//!
//! The label font goes through the same cache under [`FONT_KEY`].

use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zone_shared::{math::Vec3, sanitize::is_valid_model_key};

/// Cache key for the shared label font.
pub const FONT_KEY: &str = "@font";

/// World-space size of name labels.
pub const LABEL_SIZE: f32 = 0.12;

/// Height of name labels above the model origin.
pub const LABEL_HEIGHT: f32 = 0.4;

/// A loaded model. Cloning is cheap and never touches the cached original.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub key: String,
    pub data: Bytes,
}

/// Horizontal advance of one glyph, in font units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub ha: f32,
}

/// Typeface metrics used to lay out name labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Font {
    #[serde(rename = "familyName")]
    pub family: String,
    pub resolution: f32,
    pub glyphs: HashMap<String, Glyph>,
}

/// Laid-out label text, centred over its anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMesh {
    pub text: String,
    pub size: f32,
    pub width: f32,
    pub offset: Vec3,
}

impl Font {
    fn advance(&self, c: char) -> f32 {
        let mut buf = [0u8; 4];
        let key: &str = c.encode_utf8(&mut buf);
        let glyph = self.glyphs.get(key).or_else(|| self.glyphs.get("?"));
        glyph.map(|g| g.ha).unwrap_or(self.resolution * 0.5)
    }

    pub fn layout(&self, text: &str, size: f32) -> TextMesh {
        let units: f32 = text.chars().map(|c| self.advance(c)).sum();
        let width = if self.resolution > 0.0 {
            units / self.resolution * size
        } else {
            0.0
        };
        TextMesh {
            text: text.to_string(),
            size,
            width,
            offset: Vec3::new(-0.5 * width, LABEL_HEIGHT, 0.0),
        }
    }
}

/// Result of asking the cache for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire<A> {
    /// Already loaded; here is a clone.
    Ready(A),
    /// A load is in flight; the caller will be served on completion.
    Pending,
    /// First request: the caller must start the load now.
    Load,
}

#[derive(Debug)]
enum Slot<A> {
    Loading,
    Ready(A),
}

/// Key -> loaded asset, with an in-flight sentinel that coalesces requests.
#[derive(Debug)]
pub struct AssetCache<A> {
    slots: HashMap<String, Slot<A>>,
}

impl<A> Default for AssetCache<A> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<A: Clone> AssetCache<A> {
    pub fn acquire(&mut self, key: &str) -> Acquire<A> {
        match self.slots.get(key) {
            Some(Slot::Ready(asset)) => Acquire::Ready(asset.clone()),
            Some(Slot::Loading) => Acquire::Pending,
            None => {
                self.slots.insert(key.to_string(), Slot::Loading);
                Acquire::Load
            }
        }
    }

    /// Stores a finished load, replacing the sentinel.
    pub fn resolve(&mut self, key: &str, asset: A) {
        self.slots.insert(key.to_string(), Slot::Ready(asset));
    }

    /// Clears the sentinel after a failed load so the next acquire retries.
    pub fn fail(&mut self, key: &str) {
        if matches!(self.slots.get(key), Some(Slot::Loading)) {
            self.slots.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&A> {
        match self.slots.get(key) {
            Some(Slot::Ready(asset)) => Some(asset),
            _ => None,
        }
    }

    pub fn is_loading(&self, key: &str) -> bool {
        matches!(self.slots.get(key), Some(Slot::Loading))
    }
}

/// Where models and the label font come from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn load_model(&self, key: &str) -> anyhow::Result<Model>;
    async fn load_font(&self) -> anyhow::Result<Font>;
}

/// Loads `<root>/models/<key>.glb` and `<root>/font.json`.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for FsAssetSource {
    async fn load_model(&self, key: &str) -> anyhow::Result<Model> {
        anyhow::ensure!(is_valid_model_key(key), "invalid model key {key:?}");
        let path = self.root.join("models").join(format!("{key}.glb"));
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read model {}", path.display()))?;
        Ok(Model {
            key: key.to_string(),
            data: Bytes::from(data),
        })
    }

    async fn load_font(&self) -> anyhow::Result<Font> {
        let path = self.root.join("font.json");
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read font {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parse font {}", path.display()))
    }
}

/// In-memory assets, for headless clients and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAssetSource {
    pub models: HashMap<String, Bytes>,
    pub font: Option<Font>,
}

#[async_trait]
impl AssetSource for StaticAssetSource {
    async fn load_model(&self, key: &str) -> anyhow::Result<Model> {
        let data = self
            .models
            .get(key)
            .with_context(|| format!("no model {key:?}"))?;
        Ok(Model {
            key: key.to_string(),
            data: data.clone(),
        })
    }

    async fn load_font(&self) -> anyhow::Result<Font> {
        self.font.clone().context("no font")
    }
}

#[cfg(test)]
pub(crate) fn test_font() -> Font {
    let glyphs = [("a", 500.0), ("b", 600.0), ("?", 400.0)]
        .into_iter()
        .map(|(c, ha)| (c.to_string(), Glyph { ha }))
        .collect();
    Font {
        family: "Test Sans".into(),
        resolution: 1000.0,
        glyphs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_requests_coalesce_into_one_load() {
        let mut cache = AssetCache::<Model>::default();
        assert_eq!(cache.acquire("fox"), Acquire::Load);
        assert_eq!(cache.acquire("fox"), Acquire::Pending);
        assert_eq!(cache.acquire("fox"), Acquire::Pending);
        assert!(cache.is_loading("fox"));

        let model = Model {
            key: "fox".into(),
            data: Bytes::from_static(b"glb"),
        };
        assert_eq!(cache.get("fox"), None);
        cache.resolve("fox", model.clone());
        assert_eq!(cache.get("fox"), Some(&model));
        assert_eq!(cache.acquire("fox"), Acquire::Ready(model));
    }

    #[test]
    fn failed_load_is_retried() {
        let mut cache = AssetCache::<Model>::default();
        assert_eq!(cache.acquire("owl"), Acquire::Load);
        cache.fail("owl");
        assert!(!cache.is_loading("owl"));
        assert_eq!(cache.acquire("owl"), Acquire::Load);
    }

    #[test]
    fn labels_are_centred() {
        let font = test_font();
        let mesh = font.layout("ab", 0.1);
        assert!((mesh.width - 0.11).abs() < 1e-6);
        assert!((mesh.offset.x + 0.055).abs() < 1e-6);
        assert_eq!(mesh.offset.y, LABEL_HEIGHT);

        // Unknown glyphs fall back to '?'.
        let mesh = font.layout("z", 1.0);
        assert!((mesh.width - 0.4).abs() < 1e-6);
    }

    #[test]
    fn font_parses_typeface_json() {
        let font: Font = serde_json::from_str(
            r#"{"familyName":"Open Sans","resolution":1000,"glyphs":{"a":{"ha":556,"o":"m 1 2"}}}"#,
        )
        .unwrap();
        assert_eq!(font.family, "Open Sans");
        assert_eq!(font.glyphs["a"].ha, 556.0);
    }

    #[tokio::test]
    async fn fs_source_refuses_unsafe_keys() {
        let source = FsAssetSource::new("/nonexistent");
        assert!(source.load_model("../secret").await.is_err());
    }
}
