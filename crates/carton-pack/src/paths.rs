//! Relative-path algebra
//!
//! Pure string-level path operations shared by the packer, the module
//! resolver, and the runtime loader. All functions work on forward-slash
//! relative paths and never touch the filesystem, so both archive keys and
//! virtual-tree lookups go through the same normalization.

/// The directory key used for the top of a relative tree.
pub const ROOT_DIR: &str = ".";

/// Normalize a relative path.
///
/// - Backslashes become forward slashes
/// - `.` segments and empty segments are dropped
/// - `..` pops the previous segment where possible; unmatched `..` is kept
/// - The empty path normalizes to `.`
pub fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let unified = path.replace('\\', "/");

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&"..") | None => out.push(".."),
                Some(_) => {
                    out.pop();
                }
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        ROOT_DIR.to_string()
    } else {
        out.join("/")
    }
}

/// Join a directory and a child path, normalizing the result.
pub fn join(base: &str, child: &str) -> String {
    if base.is_empty() || base == ROOT_DIR {
        normalize(child)
    } else {
        normalize(&format!("{}/{}", base, child))
    }
}

/// The containing directory of a normalized path (`.` at the top level).
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => ROOT_DIR.to_string(),
    }
}

/// The final component of a normalized path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// The extension of the final component, without the dot.
pub fn extension(path: &str) -> Option<&str> {
    let base = basename(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 => Some(&base[idx + 1..]),
        _ => None,
    }
}

/// Resolve a request against a base directory.
///
/// Requests starting with `./` or `../` are taken relative to `base_dir`;
/// anything else is returned normalized as-is.
pub fn resolve_from(base_dir: &str, request: &str) -> String {
    let unified = request.replace('\\', "/");
    if unified.starts_with("./") || unified.starts_with("../") || unified == "." || unified == ".."
    {
        join(base_dir, &unified)
    } else {
        normalize(&unified)
    }
}

/// Whether the original request names a path rather than a bare module.
pub fn has_separator(request: &str) -> bool {
    request.contains('/') || request.contains('\\')
}

/// Iterator over a directory and its ancestors, ending with [`ROOT_DIR`].
///
/// `ancestors("a/b/c")` yields `a/b/c`, `a/b`, `a`, `.`.
pub fn ancestors(dir: &str) -> Ancestors {
    Ancestors {
        next: Some(normalize(dir)),
    }
}

pub struct Ancestors {
    next: Option<String>,
}

impl Iterator for Ancestors {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let current = self.next.take()?;
        if current != ROOT_DIR {
            self.next = Some(parent_dir(&current));
        }
        Some(current)
    }
}
