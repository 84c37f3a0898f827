//! Package boot: payload detection through startup execution.
//!
//! The loader decodes the archive appended to the running executable (or a
//! standalone archive file), publishes the virtual tree, applies the
//! extraction policy and first-run hooks, and hands the startup script to a
//! [`ScriptEngine`]. Introspection flags short-circuit before anything
//! touches the filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use carton_pack::archive::Archive;
use carton_pack::paths;
use carton_pack::payload::locate_payload;

use crate::actions;
use crate::error::LoaderError;
use crate::extract::{self, ExtractReport};
use crate::resolver::{Location, ResolverContext};
use crate::store::SourceStore;
use crate::vroot::{SharedTree, VirtualRootTree};

/// Suffix of the first-run sentinel written next to the executable.
pub const SENTINEL_SUFFIX: &str = ".installed";

/// Introspection and verbosity flags, usually mapped from command-line
/// switches of the packaged executable.
#[derive(Debug, Default, Clone)]
pub struct BootOptions {
    pub show_readme: bool,
    pub show_license: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BootStatus {
    /// Readme/license was printed; nothing was executed.
    Introspected,
    /// The execute override ran instead of the startup script.
    Relaunched(i32),
    /// The startup script ran to completion with this exit code.
    Executed(i32),
}

#[derive(Debug)]
pub struct BootOutcome {
    pub status: BootStatus,
    /// Non-fatal findings (failed hooks, missing tools).
    pub warnings: Vec<String>,
}

/// The startup script handed to the engine.
#[derive(Debug)]
pub struct ResolvedStartup {
    /// Normalized virtual path inside the package.
    pub virtual_path: String,
    pub source: Vec<u8>,
    /// Real location when extraction put the script on disk.
    pub disk_path: Option<PathBuf>,
}

/// Seam between the loader and whatever executes scripts.
pub trait ScriptEngine {
    /// Run the startup script and return its exit code.
    fn execute(&self, startup: &ResolvedStartup) -> Result<i32, String>;
}

#[derive(Debug)]
pub struct Loader {
    archive: Archive,
    store: Arc<SourceStore>,
    tree: Arc<SharedTree>,
    /// Path of the binary this payload was read from.
    exe_path: PathBuf,
}

impl Loader {
    /// Load from the executable currently running.
    pub fn from_current_exe() -> Result<Self, LoaderError> {
        let exe_path = std::env::current_exe()?;
        let image = fs::read(&exe_path)?;
        Self::from_image(&image, exe_path)
    }

    /// Load from any binary or archive file on disk.
    pub fn from_file(path: &Path) -> Result<Self, LoaderError> {
        let image = fs::read(path)?;
        // A standalone archive decodes directly; a native package carries
        // the archive in its appended payload.
        if let Ok(archive) = Archive::decode(&image) {
            return Ok(Self::from_archive(archive, path.to_path_buf()));
        }
        Self::from_image(&image, path.to_path_buf())
    }

    /// Load from an in-memory binary image.
    pub fn from_image(image: &[u8], exe_path: PathBuf) -> Result<Self, LoaderError> {
        let (start, len) = locate_payload(image)
            .ok_or_else(|| LoaderError::NoPayload(exe_path.display().to_string()))?;
        let archive = Archive::decode(&image[start..start + len])?;
        Ok(Self::from_archive(archive, exe_path))
    }

    pub fn from_archive(archive: Archive, exe_path: PathBuf) -> Self {
        let store = Arc::new(SourceStore::from_archive(&archive));
        Loader {
            archive,
            store,
            tree: Arc::new(SharedTree::new()),
            exe_path,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    fn exe_dir(&self) -> PathBuf {
        self.exe_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn sentinel_path(&self) -> PathBuf {
        self.exe_dir()
            .join(format!("{}{}", self.archive.manifest.name, SENTINEL_SUFFIX))
    }

    /// The homepage hint shown with readme/license output.
    fn homepage_hint(&self) -> Option<String> {
        if let Some(website) = &self.archive.manifest.website {
            return Some(website.clone());
        }
        let body = self.store.read("package.json").ok().flatten()?;
        let value: serde_json::Value = serde_json::from_slice(&body).ok()?;
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

    fn introspect(&self, options: &BootOptions) -> BootOutcome {
        if options.show_readme {
            match &self.archive.readme {
                Some(readme) => println!("{}", String::from_utf8_lossy(readme)),
                None => println!("this package carries no readme"),
            }
        }
        if options.show_license {
            match &self.archive.license {
                Some(license) => println!("{}", String::from_utf8_lossy(license)),
                None => println!("this package carries no license text"),
            }
        }
        if let Some(homepage) = self.homepage_hint() {
            println!("see also: {}", homepage);
        }
        BootOutcome {
            status: BootStatus::Introspected,
            warnings: Vec::new(),
        }
    }

    /// Build a resolver over this package's published tree.
    pub fn resolver(&self) -> ResolverContext {
        ResolverContext::new(
            Arc::clone(&self.tree),
            Arc::clone(&self.store),
            self.exe_dir(),
        )
    }

    /// Run the full boot sequence.
    pub fn boot(
        &self,
        options: &BootOptions,
        engine: &dyn ScriptEngine,
    ) -> Result<BootOutcome, LoaderError> {
        if options.show_readme || options.show_license {
            return Ok(self.introspect(options));
        }

        let mut warnings = Vec::new();
        let manifest = &self.archive.manifest;
        let exe_dir = self.exe_dir();

        // First-run detection and the pre-install hooks. The sentinel is
        // written even when a hook fails, so a broken hook does not rerun
        // on every start.
        let sentinel = self.sentinel_path();
        let first_run = !sentinel.exists();
        if first_run {
            if !manifest.pre_install.is_empty() {
                if let Err(err) =
                    actions::run_actions(&manifest.pre_install, &self.exe_path, &exe_dir)
                {
                    warnings.push(format!("pre-install: {}", err));
                }
            }
            if let Err(err) = fs::write(&sentinel, manifest.version.as_bytes()) {
                warnings.push(format!("could not write {}: {}", sentinel.display(), err));
            }
        }

        self.tree
            .publish(Arc::new(VirtualRootTree::populate(&self.archive)));

        let report = if manifest.extract.enabled {
            Some(extract::extract(
                &self.archive,
                &self.store,
                &manifest.extract,
                &exe_dir,
                &self.exe_path,
                first_run,
            )?)
        } else {
            None
        };

        if let Some(execute) = &manifest.execute {
            // An override naming the startup script itself would relaunch
            // this same package forever; only a distinct target relaunches.
            if paths::normalize(execute) != paths::normalize(&manifest.startup) {
                let code = self.relaunch(execute, report.as_ref(), &exe_dir)?;
                return Ok(BootOutcome {
                    status: BootStatus::Relaunched(code),
                    warnings,
                });
            }
        }

        let startup = self.resolve_startup(report.as_ref())?;
        let code = engine.execute(&startup).map_err(LoaderError::Engine)?;
        Ok(BootOutcome {
            status: BootStatus::Executed(code),
            warnings,
        })
    }

    fn resolve_startup(
        &self,
        report: Option<&ExtractReport>,
    ) -> Result<ResolvedStartup, LoaderError> {
        let manifest = &self.archive.manifest;
        let request = format!("./{}", manifest.startup);
        let resolved = self.resolver().resolve(paths::ROOT_DIR, &request)?;

        let source = match &resolved.location {
            Location::Embedded => self
                .store
                .read(&resolved.path)?
                .ok_or_else(|| LoaderError::StartupMissing(resolved.path.clone()))?,
            Location::Disk(path) => fs::read(path)?,
            Location::Builtin => {
                return Err(LoaderError::StartupMissing(resolved.path.clone()));
            }
        };

        let disk_path = match &resolved.location {
            Location::Disk(path) => Some(path.clone()),
            Location::Embedded => report.and_then(|r| {
                let extracted = r.target_dir.join(&resolved.path);
                extracted.is_file().then_some(extracted)
            }),
            Location::Builtin => None,
        };

        Ok(ResolvedStartup {
            virtual_path: resolved.path,
            source,
            disk_path,
        })
    }

    /// Re-run the host binary on the execute override target, streaming
    /// its output, and pass its exit code through.
    fn relaunch(
        &self,
        execute: &str,
        report: Option<&ExtractReport>,
        exe_dir: &Path,
    ) -> Result<i32, LoaderError> {
        let rel = paths::normalize(execute);
        let target = report
            .map(|r| r.target_dir.join(&rel))
            .filter(|p| p.is_file())
            .unwrap_or_else(|| exe_dir.join(&rel));
        let status = Command::new(&self.exe_path).arg(&target).status()?;
        Ok(status.code().unwrap_or(1))
    }
}
