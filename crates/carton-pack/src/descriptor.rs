//! Project descriptor (`.ctp`) parsing and validation.
//!
//! The descriptor is a JSON file describing a packageable project: metadata,
//! the startup script, file/asset lists, extraction policy, and native-package
//! options. Empty file lists mean "collect from disk at pack time".

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

/// File extension of a project descriptor.
pub const DESCRIPTOR_EXTENSION: &str = "ctp";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid descriptor: {0}")]
    Invalid(String),
}

/// Extraction policy for a packed application.
///
/// Accepts the shorthand boolean form (`"extract": true`) as well as the
/// full object form when deserialized through [`ProjectDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExtractPolicy {
    /// Whether any extraction happens at startup.
    pub enabled: bool,

    /// Glob patterns selecting what to extract. `None` extracts everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what: Option<Vec<String>>,

    /// Target directory name, relative to the executable's directory.
    /// Defaults to the package name. `"./"` extracts in place.
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// A message printed before extraction begins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Print each extracted path.
    pub verbose: bool,

    /// Replace files that already exist on disk.
    pub overwrite: bool,

    /// Shell commands run before extraction (first run only).
    #[serde(rename = "pre-actions", skip_serializing_if = "Vec::is_empty")]
    pub pre_actions: Vec<String>,

    /// Shell commands run after extraction (first run only).
    #[serde(rename = "post-actions", skip_serializing_if = "Vec::is_empty")]
    pub post_actions: Vec<String>,
}

impl ExtractPolicy {
    /// Whether only a subset of the archive is extracted.
    pub fn is_partial(&self) -> bool {
        self.what.is_some()
    }

    /// The effective target directory, with the legacy in-place alias folded
    /// into `"./"`.
    pub fn target_dir(&self) -> Option<&str> {
        match self.destination.as_deref() {
            Some("__dirname") => Some("./"),
            other => other,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractField {
    Flag(bool),
    Policy(PolicyRepr),
}

/// Wire form of the policy object; `enabled` is optional because writing
/// the object at all implies extraction.
#[derive(Deserialize, Default)]
#[serde(default)]
struct PolicyRepr {
    enabled: Option<bool>,
    what: Option<Vec<String>>,
    #[serde(rename = "where")]
    destination: Option<String>,
    message: Option<String>,
    verbose: bool,
    overwrite: bool,
    #[serde(rename = "pre-actions")]
    pre_actions: Vec<String>,
    #[serde(rename = "post-actions")]
    post_actions: Vec<String>,
}

fn deserialize_extract<'de, D>(deserializer: D) -> Result<ExtractPolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match ExtractField::deserialize(deserializer)? {
        ExtractField::Flag(enabled) => Ok(ExtractPolicy {
            enabled,
            ..ExtractPolicy::default()
        }),
        ExtractField::Policy(repr) => Ok(ExtractPolicy {
            enabled: repr.enabled.unwrap_or(true),
            what: repr.what,
            destination: repr.destination,
            message: repr.message,
            verbose: repr.verbose,
            overwrite: repr.overwrite,
            pre_actions: repr.pre_actions,
            post_actions: repr.post_actions,
        }),
    }
}

/// Which embedded sources may shadow onto the real filesystem.
///
/// `true` lets every embedded source also be read through ordinary file
/// access; a map lists per-file exceptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SourceReach {
    All(bool),
    PerPath(BTreeMap<String, bool>),
}

impl Default for SourceReach {
    fn default() -> Self {
        SourceReach::All(true)
    }
}

impl SourceReach {
    /// Whether the given normalized path is reachable through plain reads.
    pub fn allows(&self, path: &str) -> bool {
        match self {
            SourceReach::All(flag) => *flag,
            SourceReach::PerPath(map) => {
                let key = paths::normalize(path);
                map.get(&key)
                    .or_else(|| map.get(&format!("./{}", key)))
                    .copied()
                    .unwrap_or(true)
            }
        }
    }
}

/// A parsed project descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectDescriptor {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub author: String,
    pub description: String,
    pub company: String,
    pub copyright: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// The script executed when the package starts.
    pub startup: String,

    /// Override command run instead of the startup script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,

    /// Output base name; defaults to the descriptor's name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Script files to embed. Empty means collect from disk.
    pub files: Vec<String>,

    /// Non-script files to embed. Empty means collect from disk.
    pub assets: Vec<String>,

    /// Shell commands run once, on the first start of a native package.
    #[serde(rename = "preInstall", skip_serializing_if = "Vec::is_empty")]
    pub pre_install: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme_file: Option<String>,

    /// Produce a self-running executable instead of a plain archive.
    pub native: bool,

    /// Signing identity passed to the platform signing tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,

    #[serde(deserialize_with = "deserialize_extract")]
    pub extract: ExtractPolicy,

    pub fs_reach_sources: SourceReach,
}

impl ProjectDescriptor {
    /// Load and parse a descriptor file.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a descriptor from a JSON string.
    pub fn from_str(content: &str) -> Result<Self, DescriptorError> {
        let descriptor: ProjectDescriptor = serde_json::from_str(content)?;
        Ok(descriptor)
    }

    /// Validate the descriptor's internal consistency.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::Invalid("name must not be empty".into()));
        }
        if self.version.is_empty() {
            return Err(DescriptorError::Invalid("version must not be empty".into()));
        }
        if self.startup.is_empty() {
            return Err(DescriptorError::Invalid(
                "startup script must be set".into(),
            ));
        }
        for file in &self.files {
            if !matches!(paths::extension(file), Some("js") | Some("json")) {
                return Err(DescriptorError::Invalid(format!(
                    "'{}' is not a script source; list it under assets",
                    file
                )));
            }
        }
        if paths::extension(&self.startup) != Some("js") {
            return Err(DescriptorError::Invalid(format!(
                "startup script '{}' must be a .js file",
                self.startup
            )));
        }
        if self.sign.is_some() && !self.native {
            return Err(DescriptorError::Invalid(
                "sign requires a native package".into(),
            ));
        }
        if let Some(dir) = self.extract.target_dir() {
            // Normalize first so `x/../../y` cannot smuggle a `..` past
            // the prefix check.
            let normalized = paths::normalize(dir);
            if dir.starts_with('/') || normalized == ".." || normalized.starts_with("../") {
                return Err(DescriptorError::Invalid(format!(
                    "extraction target '{}' must stay inside the package directory",
                    dir
                )));
            }
        }
        Ok(())
    }

    /// The base name used for output files.
    pub fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.name)
    }

    /// Fold fields from a sibling `package.json` into the descriptor.
    ///
    /// A `bin` entry becomes the execute override and forces extraction;
    /// `homepage` (or the repository URL) fills in the website. Metadata
    /// fields are only taken when the descriptor leaves them empty.
    pub fn merge_package_json(&mut self, project_root: &Path) -> Result<(), DescriptorError> {
        let path = project_root.join("package.json");
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;

        if self.name.is_empty() {
            if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
                self.name = name.to_string();
            }
        }
        if self.version.is_empty() {
            if let Some(version) = value.get("version").and_then(|v| v.as_str()) {
                self.version = version.to_string();
            }
        }
        if self.description.is_empty() {
            if let Some(desc) = value.get("description").and_then(|v| v.as_str()) {
                self.description = desc.to_string();
            }
        }
        if self.author.is_empty() {
            if let Some(author) = author_field(&value) {
                self.author = author;
            }
        }
        if self.website.is_none() {
            self.website = homepage_field(&value);
        }
        if self.execute.is_none() {
            if let Some(bin) = bin_field(&value) {
                self.execute = Some(bin);
                self.extract.enabled = true;
            }
        }
        Ok(())
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn author_field(value: &serde_json::Value) -> Option<String> {
    match value.get("author")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => {
            obj.get("name").and_then(|v| v.as_str()).map(String::from)
        }
        _ => None,
    }
}

fn homepage_field(value: &serde_json::Value) -> Option<String> {
    if let Some(homepage) = value.get("homepage").and_then(|v| v.as_str()) {
        return Some(homepage.to_string());
    }
    match value.get("repository")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => {
            obj.get("url").and_then(|v| v.as_str()).map(String::from)
        }
        _ => None,
    }
}

fn bin_field(value: &serde_json::Value) -> Option<String> {
    match value.get("bin")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .values()
            .next()
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(extra: &str) -> String {
        format!(
            r#"{{"name": "demo", "version": "1.0.0", "startup": "main.js"{}}}"#,
            extra
        )
    }

    #[test]
    fn test_parse_minimal() {
        let d = ProjectDescriptor::from_str(&minimal("")).unwrap();
        assert_eq!(d.name, "demo");
        assert_eq!(d.startup, "main.js");
        assert!(!d.native);
        assert!(!d.extract.enabled);
        assert!(d.fs_reach_sources.allows("main.js"));
        d.validate().unwrap();
    }

    #[test]
    fn test_extract_bool_form() {
        let d = ProjectDescriptor::from_str(&minimal(r#", "extract": true"#)).unwrap();
        assert!(d.extract.enabled);
        assert!(!d.extract.is_partial());
    }

    #[test]
    fn test_extract_object_form() {
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "extract": {"what": ["*.dat"], "where": "data", "overwrite": true}"#,
        ))
        .unwrap();
        assert!(d.extract.enabled);
        assert!(d.extract.is_partial());
        assert_eq!(d.extract.target_dir(), Some("data"));
        assert!(d.extract.overwrite);
    }

    #[test]
    fn test_extract_dirname_alias() {
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "extract": {"where": "__dirname"}"#,
        ))
        .unwrap();
        assert_eq!(d.extract.target_dir(), Some("./"));
    }

    #[test]
    fn test_fs_reach_sources_per_path() {
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "fs_reach_sources": {"./lib/secret.js": false}"#,
        ))
        .unwrap();
        assert!(!d.fs_reach_sources.allows("lib/secret.js"));
        assert!(d.fs_reach_sources.allows("main.js"));
    }

    #[test]
    fn test_validate_rejects_non_js_startup() {
        let d = ProjectDescriptor::from_str(
            r#"{"name": "demo", "startup": "main.py"}"#,
        )
        .unwrap();
        assert!(matches!(d.validate(), Err(DescriptorError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_sign_without_native() {
        let d =
            ProjectDescriptor::from_str(&minimal(r#", "sign": "Cert Name""#)).unwrap();
        assert!(matches!(d.validate(), Err(DescriptorError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_escaping_target() {
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "extract": {"where": "../outside"}"#,
        ))
        .unwrap();
        assert!(matches!(d.validate(), Err(DescriptorError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_escape_hidden_behind_normalization() {
        // `x/../../outside` normalizes to `../outside`.
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "extract": {"where": "x/../../outside"}"#,
        ))
        .unwrap();
        assert!(matches!(d.validate(), Err(DescriptorError::Invalid(_))));

        // A plain inner `..` that stays inside is still fine.
        let d = ProjectDescriptor::from_str(&minimal(
            r#", "extract": {"where": "x/../data"}"#,
        ))
        .unwrap();
        d.validate().unwrap();
    }

    #[test]
    fn test_merge_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{
                "name": "from-pkg",
                "version": "2.1.0",
                "author": {"name": "Ada"},
                "homepage": "https://example.com",
                "bin": {"demo": "./cli.js"}
            }"#,
        )
        .unwrap();

        let mut d = ProjectDescriptor::from_str(&minimal("")).unwrap();
        d.merge_package_json(dir.path()).unwrap();

        // Existing fields win; missing ones are filled in.
        assert_eq!(d.name, "demo");
        assert_eq!(d.author, "Ada");
        assert_eq!(d.website.as_deref(), Some("https://example.com"));
        assert_eq!(d.execute.as_deref(), Some("./cli.js"));
        assert!(d.extract.enabled);
    }

    #[test]
    fn test_output_name() {
        let d = ProjectDescriptor::from_str(&minimal(r#", "output": "bundle""#)).unwrap();
        assert_eq!(d.output_name(), "bundle");
        let d = ProjectDescriptor::from_str(&minimal("")).unwrap();
        assert_eq!(d.output_name(), "demo");
    }
}
