//! Launch targets.
//!
//! A [`Target`] names what the runner should load: either an executable on
//! disk or a reference to a buildable project whose output is resolved at
//! launch time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Opaque identifier of a project known to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ProjectId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

/// What to launch.
///
/// Equality follows identity, not spelling: two executables are equal when
/// their normalized absolute paths match case-insensitively, and two project
/// references are equal when their ids match regardless of path.
#[derive(Debug, Clone)]
pub enum Target {
    /// A standalone executable or test assembly.
    Executable(PathBuf),
    /// A project in the host workspace. `path` is informational; the artifact
    /// path is resolved from the build system.
    ProjectReference { id: ProjectId, path: PathBuf },
}

impl Target {
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Target::Executable(path.into())
    }

    pub fn project(id: impl Into<ProjectId>, path: impl Into<PathBuf>) -> Self {
        Target::ProjectReference {
            id: id.into(),
            path: path.into(),
        }
    }

    /// The stored path of either variant.
    pub fn path(&self) -> &Path {
        match self {
            Target::Executable(path) => path,
            Target::ProjectReference { path, .. } => path,
        }
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            Target::Executable(_) => None,
            Target::ProjectReference { id, .. } => Some(*id),
        }
    }

    pub fn is_project(&self) -> bool {
        matches!(self, Target::ProjectReference { .. })
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Target::Executable(a), Target::Executable(b)) => {
                normalized_path_key(a) == normalized_path_key(b)
            }
            (Target::ProjectReference { id: a, .. }, Target::ProjectReference { id: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Target::Executable(path) => {
                0u8.hash(state);
                normalized_path_key(path).hash(state);
            }
            Target::ProjectReference { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Executable(path) => write!(f, "executable {}", path.display()),
            Target::ProjectReference { id, path } => {
                write!(f, "project {} ({})", id, path.display())
            }
        }
    }
}

/// Comparison key for a path: absolute, `/`-separated, `.`/`..` resolved and
/// lowercased.
///
/// Both Windows (`C:\dir`, `\\server\share`) and Unix spellings are treated
/// as rooted on every platform; anything else is joined to the current
/// directory first.
pub fn normalized_path_key(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");

    let absolute = if is_rooted(&raw) {
        raw
    } else {
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        format!("{}/{}", cwd, raw)
    };

    let (prefix, rest) = split_root(&absolute);
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("{}{}", prefix, parts.join("/")).to_lowercase()
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_rooted(s: &str) -> bool {
    s.starts_with('/') || has_drive_prefix(s)
}

fn split_root(s: &str) -> (String, &str) {
    if has_drive_prefix(s) {
        (format!("{}/", &s[..2]), &s[2..])
    } else if let Some(rest) = s.strip_prefix("//") {
        // UNC share keeps its double slash.
        ("//".to_string(), rest)
    } else if let Some(rest) = s.strip_prefix('/') {
        ("/".to_string(), rest)
    } else {
        (String::new(), s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pid(n: u128) -> ProjectId {
        ProjectId::new(Uuid::from_u128(n))
    }

    #[test]
    fn test_executable_equality_ignores_case_and_separators() {
        let a = Target::executable(r"C:\a\x.exe");
        let b = Target::executable(r"c:\\A\\X.EXE");
        assert_eq!(a, b);
    }

    #[test]
    fn test_executable_equality_resolves_dots() {
        let a = Target::executable("/opt/tests/./bin/../bin/Suite.dll");
        let b = Target::executable("/opt/tests/bin/suite.dll");
        assert_eq!(a, b);
    }

    #[test]
    fn test_relative_executable_resolves_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let a = Target::executable("suite.dll");
        let b = Target::executable(cwd.join("suite.dll"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_executables_differ() {
        assert_ne!(
            Target::executable("/opt/a/suite.dll"),
            Target::executable("/opt/b/suite.dll")
        );
    }

    #[test]
    fn test_project_equality_by_id_only() {
        let a = Target::project(pid(1), "/src/a/a.csproj");
        let same_id = Target::project(pid(1), "/src/elsewhere.csproj");
        let other = Target::project(pid(2), "/src/a/a.csproj");
        assert_eq!(a, same_id);
        assert_ne!(a, other);
    }

    #[test]
    fn test_variants_never_equal() {
        let exe = Target::executable("/src/a/a.csproj");
        let project = Target::project(pid(1), "/src/a/a.csproj");
        assert_ne!(exe, project);
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(Target::executable(r"C:\Tests\Suite.dll"));
        set.insert(Target::executable("c:/tests/suite.dll"));
        set.insert(Target::project(pid(7), "/a"));
        set.insert(Target::project(pid(7), "/b"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_normalized_key_keeps_root_on_parent_overflow() {
        assert_eq!(normalized_path_key(Path::new("/../../etc")), "/etc");
        assert_eq!(normalized_path_key(Path::new(r"D:\..\Work")), "d:/work");
    }

    #[test]
    fn test_project_id_display() {
        assert_eq!(
            pid(0x1).to_string(),
            "{00000000-0000-0000-0000-000000000001}"
        );
    }
}
