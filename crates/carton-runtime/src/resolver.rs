//! Module resolution against the virtual overlay.
//!
//! Requests resolve in this order: builtins, then the cache, then embedded
//! content, then the real filesystem under the application root and the
//! global module paths. Embedded candidates are checked through the packed
//! key variants, so `./util` finds `util.js.ctn` and an explicit
//! `./util.js.ctn` request still works.
//!
//! A bare request (`lodash`) prefers a `node_modules` package over a virtual
//! file of the same name; a request with a separator (`./lodash`,
//! `pkg/sub`) prefers the literal match. The failure message lists every
//! location that was searched.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use carton_pack::archive::{ArchiveError, PACKED_SUFFIX};
use carton_pack::paths;

use crate::store::SourceStore;
use crate::vroot::{RetryBudget, SharedTree, VirtualRootTree};

/// Packed-key suffixes tried for each candidate, in order.
pub const EXTENSION_VARIANTS: &[&str] = &["", ".ctn", ".js.ctn", ".json.ctn"];

/// Plain-file suffixes tried on the real filesystem.
const DISK_VARIANTS: &[&str] = &["", ".js", ".json"];

/// Directory name searched for global modules under the home directory.
pub const GLOBAL_MODULES_DIR: &str = ".carton_modules";

/// Environment variable holding extra global module paths.
pub const PATH_ENV_VAR: &str = "CARTON_PATH";

const BUILTIN_MODULES: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "console", "constants", "crypto", "dgram",
    "dns", "domain", "events", "fs", "http", "https", "module", "net", "os", "path", "process",
    "punycode", "querystring", "readline", "stream", "string_decoder", "timers", "tls", "tty",
    "url", "util", "vm", "zlib",
];

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cannot find module '{request}' (searched: {searched:?})")]
    ModuleNotFound {
        request: String,
        searched: Vec<String>,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Where a resolved module lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Builtin,
    Embedded,
    Disk(PathBuf),
}

/// A successfully resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Normalized virtual path, or the builtin/disk name.
    pub path: String,
    pub location: Location,
}

impl Resolved {
    fn embedded(path: String) -> Self {
        Resolved {
            path,
            location: Location::Embedded,
        }
    }
}

pub struct ResolverContext {
    tree: Arc<SharedTree>,
    store: Arc<SourceStore>,
    /// Real directory the package runs from; disk fallback is rooted here.
    app_root: PathBuf,
    global_paths: Vec<PathBuf>,
    builtins: BTreeSet<String>,
    budget: RetryBudget,
    path_cache: Mutex<HashMap<String, Resolved>>,
    main_cache: Mutex<HashMap<String, Option<String>>>,
    loaded: Mutex<BTreeSet<String>>,
}

impl ResolverContext {
    pub fn new(tree: Arc<SharedTree>, store: Arc<SourceStore>, app_root: PathBuf) -> Self {
        ResolverContext {
            tree,
            store,
            app_root,
            global_paths: default_global_paths(),
            builtins: BUILTIN_MODULES.iter().map(|s| s.to_string()).collect(),
            budget: RetryBudget::default(),
            path_cache: Mutex::new(HashMap::new()),
            main_cache: Mutex::new(HashMap::new()),
            loaded: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_global_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.global_paths = paths;
        self
    }

    pub fn is_builtin(&self, request: &str) -> bool {
        !paths::has_separator(request) && self.builtins.contains(request)
    }

    /// Mark a module as loaded; returns false if it already was.
    pub fn mark_loaded(&self, path: &str) -> bool {
        self.loaded.lock().insert(paths::normalize(path))
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.loaded.lock().contains(&paths::normalize(path))
    }

    /// Resolve `request` as seen from the virtual directory `base_dir`.
    pub fn resolve(&self, base_dir: &str, request: &str) -> Result<Resolved, ResolveError> {
        if self.is_builtin(request) {
            return Ok(Resolved {
                path: request.to_string(),
                location: Location::Builtin,
            });
        }

        let cache_key = format!("{}\u{0}{}", paths::normalize(base_dir), request);
        if let Some(hit) = self.path_cache.lock().get(&cache_key) {
            return Ok(hit.clone());
        }

        // If the tree never arrives within the budget, the embedded side is
        // simply empty: only the disk fallback remains, and a miss is an
        // ordinary module-not-found.
        let Some(tree) = self.tree.wait(self.budget) else {
            let mut searched = Vec::new();
            let target = literal_target(base_dir, request);
            return match self.disk_lookup(&target, &mut searched) {
                Some(hit) => {
                    self.path_cache.lock().insert(cache_key, hit.clone());
                    Ok(hit)
                }
                None => Err(ResolveError::ModuleNotFound {
                    request: request.to_string(),
                    searched,
                }),
            };
        };

        let mut searched = Vec::new();
        let resolved = self.resolve_uncached(&tree, base_dir, request, &mut searched)?;
        match resolved {
            Some(resolved) => {
                self.path_cache
                    .lock()
                    .insert(cache_key, resolved.clone());
                Ok(resolved)
            }
            None => Err(ResolveError::ModuleNotFound {
                request: request.to_string(),
                searched,
            }),
        }
    }

    fn resolve_uncached(
        &self,
        tree: &VirtualRootTree,
        base_dir: &str,
        request: &str,
        searched: &mut Vec<String>,
    ) -> Result<Option<Resolved>, ResolveError> {
        if is_relative_request(request) {
            let target = paths::resolve_from(base_dir, request);
            if let Some(hit) = self.lookup_target(tree, &target, searched)? {
                return Ok(Some(hit));
            }
            return Ok(self.disk_lookup(&target, searched));
        }

        let literal = paths::normalize(request);
        if paths::has_separator(request) {
            // Explicit separator: the literal path wins over packages.
            if let Some(hit) = self.lookup_target(tree, &literal, searched)? {
                return Ok(Some(hit));
            }
            if let Some(hit) = self.module_lookup(tree, base_dir, request, searched)? {
                return Ok(Some(hit));
            }
        } else {
            // Bare name: packages win; a literal virtual file of the same
            // name is only used when no package provides the module.
            let deferred = self.lookup_target(tree, &literal, searched)?;
            if let Some(hit) = self.module_lookup(tree, base_dir, request, searched)? {
                return Ok(Some(hit));
            }
            if deferred.is_some() {
                return Ok(deferred);
            }
        }
        Ok(self.disk_lookup(&literal, searched))
    }

    /// Try a virtual path as a file, then as a directory with a main.
    fn lookup_target(
        &self,
        tree: &VirtualRootTree,
        target: &str,
        searched: &mut Vec<String>,
    ) -> Result<Option<Resolved>, ResolveError> {
        if let Some(hit) = self.try_embedded_file(target, searched) {
            return Ok(Some(hit));
        }
        if tree.is_dir(target) {
            return self.try_dir_main(tree, target, searched);
        }
        Ok(None)
    }

    /// Check the packed-key variants for one candidate path.
    fn try_embedded_file(&self, target: &str, searched: &mut Vec<String>) -> Option<Resolved> {
        for variant in EXTENSION_VARIANTS {
            let key = format!("{}{}", target, variant);
            if !key.ends_with(PACKED_SUFFIX) {
                continue;
            }
            let original = key[..key.len() - PACKED_SUFFIX.len()].to_string();
            if self.store.contains(&original) {
                return Some(Resolved::embedded(original));
            }
            searched.push(key);
        }
        None
    }

    /// Resolve a virtual directory through its package main or index file.
    fn try_dir_main(
        &self,
        tree: &VirtualRootTree,
        dir: &str,
        searched: &mut Vec<String>,
    ) -> Result<Option<Resolved>, ResolveError> {
        let main = {
            let cache = self.main_cache.lock();
            cache.get(dir).cloned()
        };
        let main = match main {
            Some(cached) => cached,
            None => {
                let probed = self.probe_package_main(dir)?;
                self.main_cache
                    .lock()
                    .insert(dir.to_string(), probed.clone());
                probed
            }
        };

        if let Some(main) = main {
            let target = paths::join(dir, &main);
            if let Some(hit) = self.try_embedded_file(&target, searched) {
                return Ok(Some(hit));
            }
            // A package main may itself name a directory.
            if tree.is_dir(&target) {
                let index = paths::join(&target, "index");
                if let Some(hit) = self.try_embedded_file(&index, searched) {
                    return Ok(Some(hit));
                }
            }
        }

        let index = paths::join(dir, "index");
        Ok(self.try_embedded_file(&index, searched))
    }

    /// Read `dir/package.json` from the store and extract its main field.
    fn probe_package_main(&self, dir: &str) -> Result<Option<String>, ResolveError> {
        let manifest_path = paths::join(dir, "package.json");
        let Some(body) = self.store.read(&manifest_path)? else {
            return Ok(None);
        };
        let value: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        Ok(value
            .get("main")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    /// Walk `node_modules` directories from `base_dir` up to the virtual
    /// root, then the global module paths on disk.
    fn module_lookup(
        &self,
        tree: &VirtualRootTree,
        base_dir: &str,
        request: &str,
        searched: &mut Vec<String>,
    ) -> Result<Option<Resolved>, ResolveError> {
        let request = paths::normalize(request);
        for ancestor in paths::ancestors(base_dir) {
            if paths::basename(&ancestor) == "node_modules" {
                continue;
            }
            let candidate = paths::join(&paths::join(&ancestor, "node_modules"), &request);
            if let Some(hit) = self.lookup_target(tree, &candidate, searched)? {
                return Ok(Some(hit));
            }
        }

        // Real node_modules directories from the application root upward,
        // then the global module paths.
        let mut dir = Some(self.app_root.as_path());
        while let Some(current) = dir {
            if current.file_name().map_or(false, |n| n == "node_modules") {
                dir = current.parent();
                continue;
            }
            let candidate = current.join("node_modules").join(&request);
            if let Some(path) = disk_find(&candidate, searched) {
                return Ok(Some(Resolved {
                    path: request.clone(),
                    location: Location::Disk(path),
                }));
            }
            dir = current.parent();
        }

        for global in &self.global_paths {
            if let Some(path) = disk_find(&global.join(&request), searched) {
                return Ok(Some(Resolved {
                    path: request.clone(),
                    location: Location::Disk(path),
                }));
            }
        }
        Ok(None)
    }

    /// Last resort: the real filesystem under the application root.
    fn disk_lookup(&self, target: &str, searched: &mut Vec<String>) -> Option<Resolved> {
        let path = disk_find(&self.app_root.join(target), searched)?;
        Some(Resolved {
            path: target.to_string(),
            location: Location::Disk(path),
        })
    }
}

fn is_relative_request(request: &str) -> bool {
    request.starts_with("./")
        || request.starts_with("../")
        || request.starts_with(".\\")
        || request.starts_with("..\\")
}

/// The path a request names when taken literally.
fn literal_target(base_dir: &str, request: &str) -> String {
    if is_relative_request(request) {
        paths::resolve_from(base_dir, request)
    } else {
        paths::normalize(request)
    }
}

/// Try a disk candidate as a file with the plain variants, then as a
/// directory with a package main or index.
fn disk_find(candidate: &Path, searched: &mut Vec<String>) -> Option<PathBuf> {
    for variant in DISK_VARIANTS {
        let mut path = candidate.as_os_str().to_owned();
        path.push(variant);
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        searched.push(path.display().to_string());
    }

    if candidate.is_dir() {
        if let Ok(body) = std::fs::read(candidate.join("package.json")) {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
                if let Some(main) = value.get("main").and_then(|v| v.as_str()) {
                    let main_path = candidate.join(main);
                    if main_path.is_file() {
                        return Some(main_path);
                    }
                    if let Some(found) = disk_find(&main_path, searched) {
                        return Some(found);
                    }
                }
            }
        }
        let index = candidate.join("index.js");
        if index.is_file() {
            return Some(index);
        }
        searched.push(index.display().to_string());
    }
    None
}

fn default_global_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(raw) = std::env::var(PATH_ENV_VAR) {
        let separator = if cfg!(windows) { ';' } else { ':' };
        out.extend(
            raw.split(separator)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        );
    }
    if let Some(home) = dirs::home_dir() {
        out.push(home.join(GLOBAL_MODULES_DIR));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use carton_pack::archive::{Archive, FileStat};
    use carton_pack::compress;
    use carton_pack::descriptor::ProjectDescriptor;

    fn build_context(files: &[(&str, &str)]) -> ResolverContext {
        let manifest =
            ProjectDescriptor::from_str(r#"{"name": "demo", "startup": "main.js"}"#).unwrap();
        let mut archive = Archive::new(manifest);
        for (path, body) in files {
            archive.insert_file(
                path,
                compress::compress(body.as_bytes()).unwrap(),
                FileStat {
                    size: body.len() as u64,
                    mode: 0o100_644,
                    mtime: 0,
                },
            );
        }

        let store = Arc::new(SourceStore::from_archive(&archive));
        let shared = Arc::new(SharedTree::new());
        shared.publish(Arc::new(VirtualRootTree::populate(&archive)));
        ResolverContext::new(shared, store, std::env::temp_dir().join("carton-none"))
            .with_global_paths(Vec::new())
    }

    #[test]
    fn test_relative_variants() {
        let ctx = build_context(&[("main.js", "a"), ("lib/util.js", "b"), ("conf.json", "c")]);

        let hit = ctx.resolve(".", "./lib/util").unwrap();
        assert_eq!(hit.path, "lib/util.js");
        assert_eq!(hit.location, Location::Embedded);

        assert_eq!(ctx.resolve(".", "./lib/util.js").unwrap().path, "lib/util.js");
        assert_eq!(ctx.resolve(".", "./conf").unwrap().path, "conf.json");
        assert_eq!(ctx.resolve("lib", "../main").unwrap().path, "main.js");
        assert_eq!(
            ctx.resolve(".", "./lib/util.js.ctn").unwrap().path,
            "lib/util.js"
        );
    }

    #[test]
    fn test_builtin_wins() {
        let ctx = build_context(&[("fs.js", "shadow")]);
        let hit = ctx.resolve(".", "fs").unwrap();
        assert_eq!(hit.location, Location::Builtin);
        // A relative request still reaches the virtual file.
        assert_eq!(ctx.resolve(".", "./fs").unwrap().path, "fs.js");
    }

    #[test]
    fn test_package_main_and_index() {
        let ctx = build_context(&[
            ("main.js", "a"),
            ("node_modules/withmain/package.json", r#"{"main": "lib/entry.js"}"#),
            ("node_modules/withmain/lib/entry.js", "m"),
            ("node_modules/plain/index.js", "i"),
        ]);

        assert_eq!(
            ctx.resolve(".", "withmain").unwrap().path,
            "node_modules/withmain/lib/entry.js"
        );
        assert_eq!(
            ctx.resolve(".", "plain").unwrap().path,
            "node_modules/plain/index.js"
        );
    }

    #[test]
    fn test_upward_node_modules_walk() {
        let ctx = build_context(&[
            ("app/deep/mod.js", "x"),
            ("node_modules/shared/index.js", "s"),
        ]);
        assert_eq!(
            ctx.resolve("app/deep", "shared").unwrap().path,
            "node_modules/shared/index.js"
        );
    }

    #[test]
    fn test_bare_request_prefers_package() {
        let ctx = build_context(&[
            ("helper.js", "virtual file"),
            ("node_modules/helper/index.js", "package"),
        ]);
        // Bare name: the package wins.
        assert_eq!(
            ctx.resolve(".", "helper").unwrap().path,
            "node_modules/helper/index.js"
        );
        // Explicit separator: the literal file wins.
        assert_eq!(ctx.resolve(".", "./helper").unwrap().path, "helper.js");
    }

    #[test]
    fn test_bare_request_falls_back_to_virtual_file() {
        let ctx = build_context(&[("helper.js", "virtual file")]);
        assert_eq!(ctx.resolve(".", "helper").unwrap().path, "helper.js");
    }

    #[test]
    fn test_not_found_lists_searched() {
        let ctx = build_context(&[("main.js", "a")]);
        let err = ctx.resolve(".", "./ghost").unwrap_err();
        match err {
            ResolveError::ModuleNotFound { request, searched } => {
                assert_eq!(request, "./ghost");
                assert!(!searched.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cache_returns_same_result() {
        let ctx = build_context(&[("main.js", "a")]);
        let first = ctx.resolve(".", "./main").unwrap();
        let second = ctx.resolve(".", "./main").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_loaded_registry() {
        let ctx = build_context(&[("main.js", "a")]);
        assert!(ctx.mark_loaded("./main.js"));
        assert!(!ctx.mark_loaded("main.js"));
        assert!(ctx.is_loaded("main.js"));
    }

    #[test]
    fn test_unpublished_tree_misses_as_not_found() {
        let store = Arc::new(SourceStore::from_archive(&Archive::new(
            ProjectDescriptor::from_str(r#"{"name": "demo", "startup": "main.js"}"#).unwrap(),
        )));
        let dir = tempfile::tempdir().unwrap();
        let ctx = ResolverContext::new(
            Arc::new(SharedTree::new()),
            store,
            dir.path().to_path_buf(),
        )
        .with_budget(RetryBudget {
            attempts: 3,
            delay: std::time::Duration::from_millis(1),
        });
        // A lapsed publish budget is an ordinary miss, not a distinct error.
        match ctx.resolve(".", "./main").unwrap_err() {
            ResolveError::ModuleNotFound { request, searched } => {
                assert_eq!(request, "./main");
                assert!(!searched.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unpublished_tree_still_resolves_from_disk() {
        let store = Arc::new(SourceStore::from_archive(&Archive::new(
            ProjectDescriptor::from_str(r#"{"name": "demo", "startup": "main.js"}"#).unwrap(),
        )));
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("local.js"), "on disk").unwrap();
        let ctx = ResolverContext::new(
            Arc::new(SharedTree::new()),
            store,
            dir.path().to_path_buf(),
        )
        .with_budget(RetryBudget {
            attempts: 3,
            delay: std::time::Duration::from_millis(1),
        });
        let hit = ctx.resolve(".", "./local").unwrap();
        assert_eq!(hit.location, Location::Disk(dir.path().join("local.js")));
    }

    #[test]
    fn test_resolution_waits_for_late_tree() {
        let manifest =
            ProjectDescriptor::from_str(r#"{"name": "demo", "startup": "main.js"}"#).unwrap();
        let mut archive = Archive::new(manifest);
        archive.insert_file(
            "main.js",
            compress::compress(b"x").unwrap(),
            FileStat {
                size: 1,
                mode: 0o100_644,
                mtime: 0,
            },
        );
        let store = Arc::new(SourceStore::from_archive(&archive));
        let shared = Arc::new(SharedTree::new());
        let ctx = Arc::new(
            ResolverContext::new(Arc::clone(&shared), store, std::env::temp_dir())
                .with_global_paths(Vec::new()),
        );

        let resolver = Arc::clone(&ctx);
        let handle = std::thread::spawn(move || resolver.resolve(".", "./main"));
        std::thread::sleep(std::time::Duration::from_millis(20));
        shared.publish(Arc::new(VirtualRootTree::populate(&archive)));

        let hit = handle.join().unwrap().unwrap();
        assert_eq!(hit.path, "main.js");
    }
}
