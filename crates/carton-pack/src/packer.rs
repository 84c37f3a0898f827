//! Pack orchestration: descriptor in, archive or native executable out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

use crate::archive::{
    strip_bom, Archive, ArchiveError, FileStat, ARCHIVE_EXTENSION, NATIVE_ADDON_EXTENSION,
};
use crate::collect::{self, FileFilter};
use crate::compress;
use crate::descriptor::{DescriptorError, ProjectDescriptor};
use crate::patch::{patch_executable, PatchError};
use crate::paths;

#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("invalid filter pattern: {0}")]
    Filter(#[from] glob::PatternError),

    #[error("pack io error: {0}")]
    Io(#[from] io::Error),

    #[error("startup script '{startup}' is not among the packaged files")]
    StartupNotIncluded { startup: String },

    #[error("file '{path}' does not exist under the project root")]
    FileMissing { path: String },
}

/// The result of packing a project, ready to be written out.
#[derive(Debug)]
pub struct PackOutput {
    pub archive: Archive,
    /// The encoded archive body, as embedded or written to disk.
    pub body: Vec<u8>,
    /// Non-fatal findings surfaced to the user.
    pub warnings: Vec<String>,
}

impl PackOutput {
    pub fn output_name(&self) -> &str {
        self.archive.manifest.output_name()
    }
}

/// Pack a project directory according to its descriptor.
///
/// When the descriptor's `files` and `assets` lists are both empty, the
/// project tree is collected from disk with `exclude` applied. Every
/// embedded body is individually compressed; the startup script must end up
/// among the packaged files.
pub fn pack(
    project_root: &Path,
    descriptor: ProjectDescriptor,
    exclude: &FileFilter,
) -> Result<PackOutput, PackError> {
    descriptor.validate()?;

    let mut manifest = descriptor;
    let mut warnings = Vec::new();

    let (files, assets, license, readme) = if manifest.files.is_empty()
        && manifest.assets.is_empty()
    {
        let collected = collect::collect(project_root, exclude, manifest.output_name())?;
        (
            collected.files,
            collected.assets,
            collected.license,
            collected.readme,
        )
    } else {
        let files: Vec<String> = manifest.files.iter().map(|f| paths::normalize(f)).collect();
        let assets: Vec<String> = manifest
            .assets
            .iter()
            .map(|f| paths::normalize(f))
            .collect();
        (files, assets, None, None)
    };

    let license = manifest.license_file.clone().or(license);
    let readme = manifest.readme_file.clone().or(readme);

    let startup = paths::normalize(&manifest.startup);
    if !files.contains(&startup) {
        return Err(PackError::StartupNotIncluded { startup });
    }

    manifest.startup = startup;
    manifest.files.clear();
    manifest.assets.clear();
    manifest.license_file = license.clone();
    manifest.readme_file = readme.clone();

    let extract_enabled = manifest.extract.enabled;
    let extract_filter = match &manifest.extract.what {
        Some(patterns) => Some(FileFilter::new(patterns)?),
        None => None,
    };

    let mut archive = Archive::new(manifest);

    for rel in files.iter().chain(assets.iter()) {
        let disk_path = project_root.join(rel);
        if !disk_path.is_file() {
            return Err(PackError::FileMissing { path: rel.clone() });
        }
        if paths::extension(rel) == Some(NATIVE_ADDON_EXTENSION)
            && !extracts(rel, extract_enabled, &extract_filter)
        {
            warnings.push(format!(
                "native addon '{}' cannot run from inside a package; \
                 consider adding it to the extraction policy",
                rel
            ));
        }
        let raw = fs::read(&disk_path)?;
        let body = compress::compress(strip_bom(&raw))?;
        archive.insert_file(rel, body, stat_of(&disk_path)?);
    }

    if let Some(rel) = &license {
        if let Ok(raw) = fs::read(project_root.join(rel)) {
            archive.license = Some(strip_bom(&raw).to_vec());
        }
    }
    if let Some(rel) = &readme {
        if let Ok(raw) = fs::read(project_root.join(rel)) {
            archive.readme = Some(strip_bom(&raw).to_vec());
        }
    }

    let body = archive.encode()?;
    Ok(PackOutput {
        archive,
        body,
        warnings,
    })
}

/// Whether the extraction policy puts this file on disk at startup.
fn extracts(rel: &str, enabled: bool, filter: &Option<FileFilter>) -> bool {
    enabled && filter.as_ref().map_or(true, |f| f.matches(rel))
}

fn stat_of(path: &Path) -> io::Result<FileStat> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(FileStat {
        size: metadata.len(),
        mode: file_mode(&metadata),
        mtime,
    })
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o040_755
    } else {
        0o100_644
    }
}

/// Write the packed archive as a standalone `.ctn` file next to the project.
pub fn write_archive(output: &PackOutput, dir: &Path) -> Result<PathBuf, PackError> {
    let path = dir.join(format!("{}.{}", output.output_name(), ARCHIVE_EXTENSION));
    fs::write(&path, &output.body)?;
    Ok(path)
}

/// Produce a native package by patching a copy of the host executable.
pub fn write_native(output: &PackOutput, dir: &Path, host: &Path) -> Result<PathBuf, PackError> {
    let mut name = output.output_name().to_string();
    if cfg!(windows) && paths::extension(&name) != Some("exe") {
        name.push_str(".exe");
    }
    let target = dir.join(name);
    patch_executable(host, &target, &output.archive.manifest.version, &output.body)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ProjectDescriptor;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("lib")).unwrap();
        fs::write(root.join("main.js"), "require('./lib/util');").unwrap();
        fs::write(root.join("lib/util.js"), "module.exports = 1;").unwrap();
        fs::write(root.join("data.bin"), [0u8, 1, 2, 3]).unwrap();
        fs::write(root.join("LICENSE"), "MIT").unwrap();
        dir
    }

    fn descriptor() -> ProjectDescriptor {
        ProjectDescriptor::from_str(
            r#"{"name": "demo", "version": "1.0.0", "startup": "main.js"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_pack_collects_and_embeds() {
        let dir = project();
        let output = pack(dir.path(), descriptor(), &FileFilter::empty()).unwrap();

        let decoded = Archive::decode(&output.body).unwrap();
        assert!(decoded.content("main.js.ctn").is_some());
        assert!(decoded.content("lib/util.js.ctn").is_some());
        assert!(decoded.content("data.bin.ctn").is_some());
        assert_eq!(decoded.license.as_deref(), Some(&b"MIT"[..]));
        assert!(decoded.manifest.files.is_empty());

        let body = decoded.content("main.js.ctn").unwrap();
        assert_eq!(
            compress::decompress(body).unwrap(),
            b"require('./lib/util');"
        );
        assert_eq!(decoded.stats["main.js"].size, 22);
    }

    #[test]
    fn test_pack_explicit_lists() {
        let dir = project();
        let mut d = descriptor();
        d.files = vec!["./main.js".into()];
        let output = pack(dir.path(), d, &FileFilter::empty()).unwrap();
        let decoded = Archive::decode(&output.body).unwrap();
        assert!(decoded.content("main.js.ctn").is_some());
        assert!(decoded.content("lib/util.js.ctn").is_none());
    }

    #[test]
    fn test_pack_missing_startup() {
        let dir = project();
        let mut d = descriptor();
        d.files = vec!["lib/util.js".into()];
        let err = pack(dir.path(), d, &FileFilter::empty()).unwrap_err();
        assert!(matches!(err, PackError::StartupNotIncluded { .. }));
    }

    #[test]
    fn test_pack_missing_file_errors() {
        let dir = project();
        let mut d = descriptor();
        d.files = vec!["main.js".into(), "gone.js".into()];
        let err = pack(dir.path(), d, &FileFilter::empty()).unwrap_err();
        assert!(matches!(err, PackError::FileMissing { .. }));
    }

    #[test]
    fn test_pack_warns_on_native_addon() {
        let dir = project();
        fs::write(dir.path().join("binding.node"), "elf").unwrap();
        let output = pack(dir.path(), descriptor(), &FileFilter::empty()).unwrap();
        assert!(output.warnings.iter().any(|w| w.contains("binding.node")));
    }

    #[test]
    fn test_no_addon_warning_when_extraction_covers_it() {
        let dir = project();
        fs::write(dir.path().join("binding.node"), "elf").unwrap();

        let covered = |extract| {
            ProjectDescriptor::from_str(&format!(
                r#"{{"name": "demo", "version": "1.0.0", "startup": "main.js",
                    "extract": {}}}"#,
                extract
            ))
            .unwrap()
        };

        // Full extraction and a matching filter both put the addon on disk.
        let output = pack(dir.path(), covered("true"), &FileFilter::empty()).unwrap();
        assert!(output.warnings.is_empty());
        let output = pack(
            dir.path(),
            covered(r#"{"what": ["*.node"]}"#),
            &FileFilter::empty(),
        )
        .unwrap();
        assert!(output.warnings.is_empty());

        // A filter that misses the addon still warns.
        let output = pack(
            dir.path(),
            covered(r#"{"what": ["*.bin"]}"#),
            &FileFilter::empty(),
        )
        .unwrap();
        assert!(output.warnings.iter().any(|w| w.contains("binding.node")));
    }

    #[test]
    fn test_write_archive() {
        let dir = project();
        let output = pack(dir.path(), descriptor(), &FileFilter::empty()).unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let path = write_archive(&output, out_dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "demo.ctn");
        let decoded = Archive::decode(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded.manifest.name, "demo");
    }
}
