//! Static scene payload, its identity, and the shared spatial index blob.
//!
//! The index blob is built once per scene identity and then only ever read,
//! so it is reference counted rather than copied between owners.

use crate::pixels::base64_bytes;
use crate::QualityParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Version tag mixed into every scene key. Bump to invalidate cached indexes.
const SCENE_KEY_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Texture {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Geometry, materials and textures loaded into every compute unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAssets {
    /// Wavefront OBJ source
    pub obj: String,
    /// Wavefront MTL source
    pub mtl: String,
    #[serde(default)]
    pub textures: Vec<Texture>,
}

impl SceneAssets {
    pub fn new(obj: impl Into<String>, mtl: impl Into<String>) -> Self {
        Self {
            obj: obj.into(),
            mtl: mtl.into(),
            textures: Vec::new(),
        }
    }
}

/// Stable identity of a scene's shared index, used as the blob-store key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneKey(String);

impl SceneKey {
    /// BLAKE3 over the geometry/material content and the settings that shape the index.
    pub fn derive(assets: &SceneAssets, quality: &QualityParams) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[SCENE_KEY_VERSION]);
        hash_field(&mut hasher, assets.obj.as_bytes());
        hash_field(&mut hasher, assets.mtl.as_bytes());
        hasher.update(&(assets.textures.len() as u64).to_le_bytes());
        for texture in &assets.textures {
            hash_field(&mut hasher, texture.name.as_bytes());
            hash_field(&mut hasher, &texture.data);
        }
        hasher.update(&quality.bvh_max_leaf_size.to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Length-prefixed so adjacent fields cannot alias.
fn hash_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Opaque serialized spatial index. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexBlob(Arc<Vec<u8>>);

impl IndexBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for IndexBlob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for IndexBlob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        base64_bytes::deserialize(deserializer).map(IndexBlob::new)
    }
}
