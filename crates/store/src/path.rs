use std::fmt;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

/// Normalized store path.
///
/// Stored without a leading slash; the root is the empty string. `.` segments
/// are dropped and `..` pops a segment (never above the root). Displays in
/// absolute POSIX form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LakePath(String);

impl LakePath {
    pub fn new(path: &str) -> Self {
        let mut parts: Vec<&str> = Vec::new();
        for part in path.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                p => parts.push(p),
            }
        }
        Self(parts.join("/"))
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path without a leading slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path with a leading slash.
    pub fn as_posix(&self) -> String {
        format!("/{}", self.0)
    }

    /// Parent directory; the root is its own parent.
    pub fn parent(&self) -> LakePath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Self(parent.to_string()),
            None => Self::root(),
        }
    }

    /// Final segment; empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }

    pub fn join(&self, rel: &str) -> LakePath {
        if self.is_root() {
            Self::new(rel)
        } else {
            Self::new(&format!("{}/{}", self.0, rel))
        }
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|p| !p.is_empty())
    }

    pub fn is_glob(&self) -> bool {
        self.0.contains(GLOB_CHARS)
    }

    /// Longest leading run of segments free of wildcard characters.
    pub fn globless_prefix(&self) -> LakePath {
        let parts: Vec<&str> = self
            .parts()
            .take_while(|p| !p.contains(GLOB_CHARS))
            .collect();
        Self(parts.join("/"))
    }

    /// Whether this path matches `pattern` in full. Wildcards do not cross
    /// `/`. An invalid pattern matches nothing.
    pub fn matches(&self, pattern: &LakePath) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        Pattern::new(pattern.as_str())
            .map(|p| p.matches_with(self.as_str(), options))
            .unwrap_or(false)
    }

    pub fn starts_with(&self, base: &LakePath) -> bool {
        base.is_root() || self.0 == base.0 || self.0.starts_with(&format!("{}/", base.0))
    }

    /// Path of `self` relative to `base`, or `None` if it is not underneath.
    /// Equal paths give the empty string.
    pub fn relative_to(&self, base: &LakePath) -> Option<&str> {
        if !self.starts_with(base) {
            return None;
        }
        if base.is_root() {
            return Some(&self.0);
        }
        Some(self.0[base.0.len()..].trim_start_matches('/'))
    }
}

impl fmt::Display for LakePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for LakePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LakePath {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}
