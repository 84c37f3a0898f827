//! Extraction of embedded content onto the real filesystem.
//!
//! Applies the descriptor's extraction policy on startup: full or partial,
//! into a named directory next to the executable or in place, with
//! skip-existing semantics unless overwrite is set. Pre and post hooks run
//! only on the package's first start.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use carton_pack::archive::{Archive, ArchiveError};
use carton_pack::collect::FileFilter;
use carton_pack::descriptor::ExtractPolicy;

use crate::actions::{self, ActionError};
use crate::store::SourceStore;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extraction target '{0}' exists and is a file")]
    TargetIsFile(PathBuf),

    #[error("invalid extraction pattern: {0}")]
    Filter(#[from] glob::PatternError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("embedded body for '{0}' is missing")]
    BodyMissing(String),

    #[error("extraction io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub struct ExtractReport {
    pub target_dir: PathBuf,
    pub extracted: usize,
    pub skipped: usize,
}

/// Apply an extraction policy.
///
/// `exe_dir` is the directory of the running executable; `run_hooks`
/// enables the pre/post actions (first run only).
pub fn extract(
    archive: &Archive,
    store: &SourceStore,
    policy: &ExtractPolicy,
    exe_dir: &Path,
    host_binary: &Path,
    run_hooks: bool,
) -> Result<ExtractReport, ExtractError> {
    let subdir = policy
        .target_dir()
        .unwrap_or(archive.manifest.name.as_str());
    let target_dir = if subdir == "./" {
        exe_dir.to_path_buf()
    } else {
        exe_dir.join(subdir)
    };

    if target_dir.is_file() {
        return Err(ExtractError::TargetIsFile(target_dir));
    }
    fs::create_dir_all(&target_dir)?;

    if let Some(message) = &policy.message {
        println!("{}", message);
    }
    if run_hooks && !policy.pre_actions.is_empty() {
        actions::run_actions(&policy.pre_actions, host_binary, &target_dir)?;
    }

    let filter = match &policy.what {
        Some(patterns) => Some(FileFilter::new(patterns)?),
        None => None,
    };

    let mut report = ExtractReport {
        target_dir: target_dir.clone(),
        extracted: 0,
        skipped: 0,
    };

    for (path, stat) in &archive.stats {
        if stat.is_dir() {
            continue;
        }
        if let Some(filter) = &filter {
            if !filter.matches(path) {
                continue;
            }
        }

        let dest = target_dir.join(path);
        if dest.exists() && !policy.overwrite {
            report.skipped += 1;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let body = store
            .read(path)?
            .ok_or_else(|| ExtractError::BodyMissing(path.clone()))?;
        fs::write(&dest, body)?;
        restore_mode(&dest, stat.mode)?;

        if policy.verbose {
            println!("extracted {}", dest.display());
        }
        report.extracted += 1;
    }

    if run_hooks && !policy.post_actions.is_empty() {
        actions::run_actions(&policy.post_actions, host_binary, &target_dir)?;
    }
    Ok(report)
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
