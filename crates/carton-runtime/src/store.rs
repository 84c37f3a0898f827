//! Embedded source store.
//!
//! Holds the archive's compressed bodies keyed by packed path and inflates
//! them on demand. Also tracks which embedded sources the descriptor hides
//! from plain file reads.

use std::collections::{BTreeMap, BTreeSet};

use carton_pack::archive::{Archive, ArchiveError, PACKED_SUFFIX};
use carton_pack::compress;
use carton_pack::paths;

#[derive(Debug)]
pub struct SourceStore {
    blobs: BTreeMap<String, Vec<u8>>,
    shadowed: BTreeSet<String>,
}

/// The packed key an embedded body is stored under.
pub fn embed_key(path: &str) -> String {
    format!("{}{}", paths::normalize(path), PACKED_SUFFIX)
}

impl SourceStore {
    pub fn from_archive(archive: &Archive) -> Self {
        let shadowed = archive
            .stats
            .keys()
            .filter(|path| !archive.manifest.fs_reach_sources.allows(path))
            .cloned()
            .collect();
        SourceStore {
            blobs: archive.contents.clone(),
            shadowed,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.contains_key(&embed_key(path))
    }

    /// Inflate an embedded body. `Ok(None)` when the path is not embedded.
    pub fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match self.blobs.get(&embed_key(path)) {
            Some(blob) => compress::decompress(blob)
                .map(Some)
                .map_err(|_| ArchiveError::Corrupt(format!("embedded body '{}' is damaged", path))),
            None => Ok(None),
        }
    }

    /// Whether plain file reads may reach this embedded source.
    pub fn reachable(&self, path: &str) -> bool {
        !self.shadowed.contains(&paths::normalize(path))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
