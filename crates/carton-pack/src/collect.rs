//! Project file collection.
//!
//! When a descriptor leaves its `files`/`assets` lists empty, the packer
//! walks the project directory and classifies what it finds. Filters use
//! glob patterns in two flavors: anchored patterns (starting with `./`)
//! match from the project root, bare patterns match at any depth.

use std::fs;
use std::io;
use std::path::Path;

use glob::{Pattern, PatternError};

use crate::archive::SCRIPT_EXTENSIONS;
use crate::descriptor::DESCRIPTOR_EXTENSION;
use crate::paths;

struct FilterRule {
    pattern: Pattern,
    anchored: bool,
}

/// A set of glob patterns applied to normalized relative paths.
pub struct FileFilter {
    rules: Vec<FilterRule>,
}

impl FileFilter {
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let unified = raw.replace('\\', "/");
            let (text, anchored) = match unified.strip_prefix("./") {
                Some(rest) => (rest.to_string(), true),
                None => (unified, false),
            };
            rules.push(FilterRule {
                pattern: Pattern::new(&text)?,
                anchored,
            });
        }
        Ok(FileFilter { rules })
    }

    pub fn empty() -> Self {
        FileFilter { rules: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any pattern matches the given normalized relative path.
    pub fn matches(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        self.rules.iter().any(|rule| {
            if rule.anchored {
                rule.pattern.matches(&path)
            } else {
                matches_bare(&rule.pattern, &path)
            }
        })
    }
}

/// A bare pattern matches any run of whole path segments, so `data` covers
/// `data/file.bin` and `*.dat` covers `a/b/c.dat`.
fn matches_bare(pattern: &Pattern, path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    for start in 0..segments.len() {
        for end in start + 1..=segments.len() {
            if pattern.matches(&segments[start..end].join("/")) {
                return true;
            }
        }
    }
    false
}

/// The classified result of a project walk.
#[derive(Debug, Default)]
pub struct Collected {
    /// Script sources, relative normalized paths.
    pub files: Vec<String>,
    /// Everything else that gets embedded.
    pub assets: Vec<String>,
    /// Top-level license file, also kept in `assets`.
    pub license: Option<String>,
    /// Top-level readme file, also kept in `assets`.
    pub readme: Option<String>,
}

/// Walk `root` and classify its contents.
///
/// Dot-entries, descriptor files, and previous pack outputs are skipped,
/// as is anything matched by `exclude`.
pub fn collect(root: &Path, exclude: &FileFilter, output_name: &str) -> io::Result<Collected> {
    let mut collected = Collected::default();
    walk(root, paths::ROOT_DIR, exclude, output_name, &mut collected)?;
    collected.files.sort();
    collected.assets.sort();
    Ok(collected)
}

fn walk(
    dir: &Path,
    rel_dir: &str,
    exclude: &FileFilter,
    output_name: &str,
    out: &mut Collected,
) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let rel = paths::join(rel_dir, &name);
        if exclude.matches(&rel) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), &rel, exclude, output_name, out)?;
        } else if file_type.is_file() {
            if is_pack_output(&name, output_name) {
                continue;
            }
            classify(&rel, rel_dir, out);
        }
    }
    Ok(())
}

fn is_pack_output(name: &str, output_name: &str) -> bool {
    if paths::extension(name) == Some(DESCRIPTOR_EXTENSION) {
        return true;
    }
    name == output_name
        || name == format!("{}.{}", output_name, crate::archive::ARCHIVE_EXTENSION)
        || name == format!("{}.exe", output_name)
}

fn classify(rel: &str, rel_dir: &str, out: &mut Collected) {
    let base = paths::basename(rel);
    let upper = base.to_ascii_uppercase();

    if rel_dir == paths::ROOT_DIR {
        if out.license.is_none() && upper.starts_with("LICENSE") {
            out.license = Some(rel.to_string());
            out.assets.push(rel.to_string());
            return;
        }
        if out.readme.is_none() && upper.starts_with("README") {
            out.readme = Some(rel.to_string());
            out.assets.push(rel.to_string());
            return;
        }
    }

    match paths::extension(rel) {
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext) => out.files.push(rel.to_string()),
        _ => out.assets.push(rel.to_string()),
    }
}
