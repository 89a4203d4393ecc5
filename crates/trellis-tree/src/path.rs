use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hierarchical address of a branch inside a data tree.
///
/// An ordered sequence of non-negative indices, written `{0;1;2}` in the
/// host-CAD notation. Paths compare lexicographically by index, which is
/// the branch ordering the canvas shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<u32>);

impl Path {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Child path one level below, at `index`. Used by graft topology to
    /// address one output branch per input item.
    pub fn child(&self, index: u32) -> Path {
        let mut indices = self.0.clone();
        indices.push(index);
        Path(indices)
    }

    /// Parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].to_vec()))
    }
}

impl From<Vec<u32>> for Path {
    fn from(indices: Vec<u32>) -> Self {
        Self(indices)
    }
}

impl From<&[u32]> for Path {
    fn from(indices: &[u32]) -> Self {
        Self(indices.to_vec())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, idx) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{idx}")?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathParseError {
    #[error("empty path")]
    Empty,
    #[error("invalid path index \"{0}\"")]
    InvalidIndex(String),
}

impl FromStr for Path {
    type Err = PathParseError;

    /// Parses `{0;1;2}`. Braces are optional so bare `0;1;2` also works.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim();
        if inner.is_empty() {
            return Err(PathParseError::Empty);
        }
        let mut indices = Vec::new();
        for token in inner.split(';') {
            let token = token.trim();
            indices.push(
                token
                    .parse::<u32>()
                    .map_err(|_| PathParseError::InvalidIndex(token.to_string()))?,
            );
        }
        Ok(Path(indices))
    }
}
