//! Virtual Root Tree: the directory overlay reconstructed from an archive.
//!
//! The tree maps each virtual directory to its entries, so `exists`, `stat`,
//! and directory listings work against embedded content without touching the
//! real filesystem. Every recorded file gets placeholder ancestor directories
//! up to the virtual root.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use carton_pack::archive::{Archive, FileStat};
use carton_pack::paths;

/// The wait budget used when module resolution races tree construction.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget {
            attempts: 1000,
            delay: Duration::from_millis(2),
        }
    }
}

impl RetryBudget {
    pub fn total(&self) -> Duration {
        self.delay * self.attempts
    }
}

/// Directory overlay keyed by normalized directory path, then basename.
#[derive(Debug, Default)]
pub struct VirtualRootTree {
    dirs: BTreeMap<String, BTreeMap<String, FileStat>>,
}

impl VirtualRootTree {
    pub fn new() -> Self {
        let mut dirs = BTreeMap::new();
        dirs.insert(paths::ROOT_DIR.to_string(), BTreeMap::new());
        VirtualRootTree { dirs }
    }

    /// Build the tree from an archive's recorded stats.
    pub fn populate(archive: &Archive) -> Self {
        let mut tree = Self::new();
        for (path, stat) in &archive.stats {
            tree.insert(path, *stat);
        }
        tree
    }

    /// Record one file and ensure its ancestor chain exists.
    pub fn insert(&mut self, path: &str, stat: FileStat) {
        let path = paths::normalize(path);
        if path == paths::ROOT_DIR {
            return;
        }
        let dir = paths::parent_dir(&path);
        let base = paths::basename(&path).to_string();
        self.ensure_chain(&dir);
        self.dirs.entry(dir).or_default().insert(base, stat);
    }

    /// Make sure `dir` and all its ancestors exist as placeholder entries.
    fn ensure_chain(&mut self, dir: &str) {
        for ancestor in paths::ancestors(dir) {
            self.dirs.entry(ancestor.clone()).or_default();
            if ancestor == paths::ROOT_DIR {
                break;
            }
            let parent = paths::parent_dir(&ancestor);
            let base = paths::basename(&ancestor).to_string();
            self.dirs
                .entry(parent)
                .or_default()
                .entry(base)
                .or_insert_with(FileStat::directory);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_some()
    }

    pub fn stat(&self, path: &str) -> Option<FileStat> {
        let path = paths::normalize(path);
        if path == paths::ROOT_DIR {
            return Some(FileStat::directory());
        }
        let dir = paths::parent_dir(&path);
        let base = paths::basename(&path);
        self.dirs.get(&dir)?.get(base).copied()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = paths::normalize(path);
        self.dirs.contains_key(&path)
            || self.stat(&path).map(|s| s.is_dir()).unwrap_or(false)
    }

    /// Entries of a virtual directory, sorted by name.
    pub fn list_dir(&self, dir: &str) -> Option<Vec<(&str, FileStat)>> {
        let dir = paths::normalize(dir);
        self.dirs
            .get(&dir)
            .map(|entries| entries.iter().map(|(k, v)| (k.as_str(), *v)).collect())
    }

    pub fn file_count(&self) -> usize {
        self.dirs
            .values()
            .flat_map(|entries| entries.values())
            .filter(|stat| !stat.is_dir())
            .count()
    }
}

/// One-shot publication cell for the tree.
///
/// Module resolution can start on other threads before the loader has
/// finished decoding the payload; consumers block on [`SharedTree::wait`]
/// with a bounded budget instead of polling.
#[derive(Debug, Default)]
pub struct SharedTree {
    slot: Mutex<Option<Arc<VirtualRootTree>>>,
    ready: Condvar,
}

impl SharedTree {
    pub fn new() -> Self {
        SharedTree::default()
    }

    /// Publish the tree. The first publication wins; later calls are no-ops.
    pub fn publish(&self, tree: Arc<VirtualRootTree>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(tree);
            self.ready.notify_all();
        }
    }

    /// The tree, if already published.
    pub fn get(&self) -> Option<Arc<VirtualRootTree>> {
        self.slot.lock().clone()
    }

    /// Block until the tree is published or the budget elapses.
    pub fn wait(&self, budget: RetryBudget) -> Option<Arc<VirtualRootTree>> {
        let deadline = Instant::now() + budget.total();
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn stat(size: u64) -> FileStat {
        FileStat {
            size,
            mode: 0o100_644,
            mtime: 0,
        }
    }

    #[test]
    fn test_placeholder_ancestors() {
        let mut tree = VirtualRootTree::new();
        tree.insert("a/b/c/file.js", stat(10));

        assert!(tree.exists("a/b/c/file.js"));
        assert!(tree.is_dir("a"));
        assert!(tree.is_dir("a/b"));
        assert!(tree.is_dir("a/b/c"));
        assert!(tree.stat("a/b").unwrap().is_dir());
        assert!(!tree.exists("a/b/other.js"));
        assert_eq!(tree.stat("a/b/c/file.js").unwrap().size, 10);
    }

    #[test]
    fn test_root_listing() {
        let mut tree = VirtualRootTree::new();
        tree.insert("main.js", stat(1));
        tree.insert("lib/util.js", stat(2));

        let entries = tree.list_dir(".").unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["lib", "main.js"]);
        assert_eq!(tree.file_count(), 2);
    }

    #[test]
    fn test_shared_tree_publish_once() {
        let shared = SharedTree::new();
        let mut first = VirtualRootTree::new();
        first.insert("one.js", stat(1));
        shared.publish(Arc::new(first));
        shared.publish(Arc::new(VirtualRootTree::new()));

        let tree = shared.get().unwrap();
        assert!(tree.exists("one.js"));
    }

    #[test]
    fn test_wait_sees_late_publication() {
        let shared = Arc::new(SharedTree::new());
        let publisher = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let mut tree = VirtualRootTree::new();
            tree.insert("late.js", stat(1));
            publisher.publish(Arc::new(tree));
        });

        let tree = shared.wait(RetryBudget::default()).unwrap();
        assert!(tree.exists("late.js"));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_without_publication() {
        let shared = SharedTree::new();
        let budget = RetryBudget {
            attempts: 5,
            delay: Duration::from_millis(1),
        };
        assert!(shared.wait(budget).is_none());
    }
}
