//! Archive encoding and decoding.
//!
//! An archive is the manifest plus every embedded file, serialized as one
//! JSON document and compressed into a single opaque body. Embedded bodies
//! are stored individually compressed under keys carrying the packed suffix;
//! the loader inflates them lazily.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compress;
use crate::descriptor::ProjectDescriptor;

/// Extension of a standalone archive file.
pub const ARCHIVE_EXTENSION: &str = "ctn";

/// Suffix appended to every embedded content key.
pub const PACKED_SUFFIX: &str = ".ctn";

/// Extensions classified as script files rather than assets.
pub const SCRIPT_EXTENSIONS: &[&str] = &["js", "json"];

/// Extension of native addons, which cannot run from inside an archive.
pub const NATIVE_ADDON_EXTENSION: &str = "node";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode archive: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt archive: {0}")]
    Corrupt(String),
}

/// Recorded metadata for one embedded file or placeholder directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

impl FileStat {
    /// The stat entry recorded for placeholder directories.
    pub fn directory() -> Self {
        FileStat {
            size: 0,
            mode: 0o040_755,
            mtime: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & 0o170_000 == 0o040_000
    }
}

/// The complete packed representation of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    /// The descriptor, with file lists cleared of anything not embedded.
    pub manifest: ProjectDescriptor,

    /// Embedded file bodies, keyed by normalized relative path plus
    /// [`PACKED_SUFFIX`]. Each body is individually compressed.
    #[serde(with = "blob_map")]
    pub contents: BTreeMap<String, Vec<u8>>,

    /// Original file metadata, keyed by normalized relative path.
    pub stats: BTreeMap<String, FileStat>,

    /// License text captured at pack time, shown on `--license`.
    #[serde(with = "blob_opt", default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Vec<u8>>,

    /// Readme text captured at pack time, shown on `--readme`.
    #[serde(with = "blob_opt", default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<Vec<u8>>,
}

impl Archive {
    pub fn new(manifest: ProjectDescriptor) -> Self {
        Archive {
            manifest,
            contents: BTreeMap::new(),
            stats: BTreeMap::new(),
            license: None,
            readme: None,
        }
    }

    /// Record one embedded file under its packed key.
    pub fn insert_file(&mut self, path: &str, body: Vec<u8>, stat: FileStat) {
        self.contents
            .insert(format!("{}{}", path, PACKED_SUFFIX), body);
        self.stats.insert(path.to_string(), stat);
    }

    /// Fetch an embedded body by its packed key.
    pub fn content(&self, packed_key: &str) -> Option<&[u8]> {
        self.contents.get(packed_key).map(Vec::as_slice)
    }

    /// Serialize and compress the archive into its on-disk body.
    pub fn encode(&self) -> Result<Vec<u8>, ArchiveError> {
        let json = serde_json::to_vec(self)?;
        Ok(compress::compress(&json)?)
    }

    /// Decode an archive body produced by [`Archive::encode`].
    pub fn decode(body: &[u8]) -> Result<Self, ArchiveError> {
        let json = compress::decompress(body)
            .map_err(|_| ArchiveError::Corrupt("not a valid compressed archive".into()))?;
        serde_json::from_slice(&json)
            .map_err(|e| ArchiveError::Corrupt(format!("malformed archive document: {}", e)))
    }
}

/// Strip a UTF-8 byte-order mark, if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

mod blob_map {
    use std::collections::BTreeMap;

    use data_encoding::BASE64;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(k, v)| (k, BASE64.encode(v))))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                BASE64
                    .decode(v.as_bytes())
                    .map(|bytes| (k, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

mod blob_opt {
    use data_encoding::BASE64;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|v| BASE64.decode(v.as_bytes()).map_err(D::Error::custom))
            .transpose()
    }
}
