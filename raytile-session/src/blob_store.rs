//! Keyed storage for built index blobs.
//!
//! Lookups are opportunistic: callers treat any error as a miss, and a failed
//! write never blocks the render.

use crate::StoreError;
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use raytile_core::{IndexBlob, SceneKey};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait BlobStore: Send + Sync {
    fn get(&self, key: &SceneKey) -> Result<Option<IndexBlob>, StoreError>;
    fn put(&self, key: &SceneKey, blob: &IndexBlob) -> Result<(), StoreError>;
}

/// In-process store. Blobs are shared, not copied.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<SceneKey, IndexBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &SceneKey) -> Result<Option<IndexBlob>, StoreError> {
        let blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &SceneKey, blob: &IndexBlob) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        blobs.insert(key.clone(), blob.clone());
        Ok(())
    }
}

/// Directory of deflate-compressed blobs, one `<key>.bvh` file per scene.
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    const EXTENSION: &'static str = "bvh";

    /// Use `dir` for storage, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SceneKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), Self::EXTENSION))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &SceneKey) -> Result<Option<IndexBlob>, StoreError> {
        let file = match fs::File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::new();
        DeflateDecoder::new(file).read_to_end(&mut bytes)?;
        Ok(Some(IndexBlob::new(bytes)))
    }

    fn put(&self, key: &SceneKey, blob: &IndexBlob) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let partial = path.with_extension("partial");

        let written = fs::File::create(&partial)
            .and_then(|file| {
                let mut encoder = DeflateEncoder::new(file, Compression::default());
                encoder.write_all(blob.as_bytes())?;
                encoder.finish()?.sync_all()
            })
            .and_then(|()| fs::rename(&partial, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        log::debug!("Stored {} byte index at {}", blob.len(), path.display());
        Ok(())
    }
}
