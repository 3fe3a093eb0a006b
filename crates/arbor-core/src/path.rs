use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// A path segment name.
///
/// `SmolStr` keeps clones cheap; segment names are copied freely between the
/// cache, events, and snapshots.
pub type Name = SmolStr;

/// Index of the first (or only) same-name sibling.
pub const INDEX_DEFAULT: u32 = 1;

/// Wildcard index: matches the first sibling regardless of how the siblings
/// are currently numbered. Never stored, only used in lookups.
pub const INDEX_UNDEFINED: u32 = 0;

/// One step of an absolute path: a name plus a 1-based same-name-sibling
/// index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    name: Name,
    index: u32,
}

impl PathSegment {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            index: INDEX_DEFAULT,
        }
    }

    pub fn with_index(name: impl Into<Name>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    #[inline]
    pub fn name(&self) -> &Name {
        &self.name
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The index used for storage and ordering: the wildcard denotes the
    /// first sibling.
    #[inline]
    pub fn normalized_index(&self) -> u32 {
        if self.index == INDEX_UNDEFINED {
            INDEX_DEFAULT
        } else {
            self.index
        }
    }

    /// Wildcard-aware equality: names must match exactly, indices match when
    /// equal after wildcard normalization.
    pub fn matches(&self, other: &PathSegment) -> bool {
        self.name == other.name && self.normalized_index() == other.normalized_index()
    }

    /// Renumbers this segment. Used by same-name-sibling shifts; `index`
    /// must be a real 1-based position, never the wildcard.
    pub fn set_index(&mut self, index: u32) {
        debug_assert!(index >= INDEX_DEFAULT);
        self.index = index;
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.normalized_index() == INDEX_DEFAULT {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

/// An absolute path: the ordered segments from the root down to an item.
///
/// The root path has no segments and displays as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments below the root; the root itself has depth 0.
    #[inline]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    pub fn child(&self, segment: PathSegment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path { segments }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Strict-prefix test after wildcard normalization: the root is an
    /// ancestor of everything but itself.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        if self.depth() >= other.depth() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a.matches(b))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Errors produced when parsing the textual `/a/b[2]` path form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    #[error("path is empty")]
    Empty,

    #[error("path {path:?} is not absolute")]
    NotAbsolute { path: String },

    #[error("path contains an empty segment at position {position}")]
    EmptySegment { position: usize },

    #[error("segment {segment:?} has a malformed same-name-sibling index")]
    InvalidIndex { segment: String },
}

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathParseError::Empty);
        }
        let Some(rest) = s.strip_prefix('/') else {
            return Err(PathParseError::NotAbsolute {
                path: s.to_string(),
            });
        };
        if rest.is_empty() {
            return Ok(Path::root());
        }

        let mut segments = Vec::new();
        for (position, raw) in rest.split('/').enumerate() {
            if raw.is_empty() {
                return Err(PathParseError::EmptySegment { position });
            }
            segments.push(parse_segment(raw)?);
        }
        Ok(Path { segments })
    }
}

fn parse_segment(raw: &str) -> Result<PathSegment, PathParseError> {
    let Some(open) = raw.find('[') else {
        return Ok(PathSegment::new(raw));
    };

    let invalid = || PathParseError::InvalidIndex {
        segment: raw.to_string(),
    };

    let Some(digits) = raw[open..].strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
        return Err(invalid());
    };
    let name = &raw[..open];
    if name.is_empty() {
        return Err(invalid());
    }
    let index: u32 = digits.parse().map_err(|_| invalid())?;
    if index == INDEX_UNDEFINED {
        // "[0]" is accepted as the explicit wildcard spelling.
        return Ok(PathSegment::with_index(name, INDEX_UNDEFINED));
    }
    Ok(PathSegment::with_index(name, index))
}
