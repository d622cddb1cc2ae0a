//! Anchor paths: `/`-separated segment sequences.

use std::fmt;

/// Errors related to anchor path parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A segment is not a usable anchor name.
    InvalidSegment {
        segment: String,
        position: usize,
        message: String,
    },
    /// The path string is invalid as a whole.
    InvalidPath { message: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::InvalidSegment {
                segment,
                position,
                message,
            } => {
                write!(
                    f,
                    "invalid anchor segment '{}' at position {}: {}",
                    segment, position, message
                )
            }
            PathError::InvalidPath { message } => write!(f, "invalid anchor path: {}", message),
        }
    }
}

impl std::error::Error for PathError {}

/// Trailing segment that asks listing tools to recurse.
pub const RECURSIVE_MARKER: &str = "...";

/// A validated anchor path.
///
/// Anchor names are far less constrained than identifiers: anything that
/// is not empty, not `.` or `..`, and carries no control characters is a
/// valid segment. Server anchors, for instance, look like `X3f0a9c21d77e1b04`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AnchorPath {
    pub segments: Vec<String>,
}

impl AnchorPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string.
    ///
    /// Empty segments are dropped, so `//a/b/` and `a/b` are the same path.
    ///
    /// ```rust
    /// use circuit_anchor::AnchorPath;
    ///
    /// let p = AnchorPath::parse("/X3f0a/jobs/build").unwrap();
    /// assert_eq!(p.len(), 3);
    /// assert_eq!(p.to_string(), "/X3f0a/jobs/build");
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let segments: Vec<String> = s
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string())
            .collect();

        for (i, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, i)?;
        }

        Ok(AnchorPath { segments })
    }

    /// Parse a path as typed by a listing tool.
    ///
    /// A trailing `...` segment is stripped and reported as the recursive
    /// flag; the anchor engine itself never sees it.
    pub fn parse_listing(s: &str) -> Result<(Self, bool), PathError> {
        let trimmed = s.trim_end_matches('/');
        match trimmed.strip_suffix(RECURSIVE_MARKER) {
            Some(rest) if rest.is_empty() || rest.ends_with('/') => {
                Ok((Self::parse(rest)?, true))
            }
            _ => Ok((Self::parse(trimmed)?, false)),
        }
    }

    /// Build a path from segments, validating each.
    pub fn try_from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for (i, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, i)?;
        }
        Ok(AnchorPath { segments })
    }

    fn validate_segment(segment: &str, position: usize) -> Result<(), PathError> {
        let fail = |message: &str| PathError::InvalidSegment {
            segment: segment.to_string(),
            position,
            message: message.to_string(),
        };

        if segment.is_empty() {
            return Err(fail("empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(fail("relative segments are not anchors"));
        }
        if segment == RECURSIVE_MARKER {
            return Err(fail("recursive marker is only valid at the end of a listing"));
        }
        if let Some(c) = segment.chars().find(|c| c.is_control()) {
            return Err(fail(&format!("control character {:?}", c)));
        }
        Ok(())
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// Append one segment.
    pub fn child(&self, name: &str) -> Result<Self, PathError> {
        Self::validate_segment(name, self.segments.len())?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(AnchorPath { segments })
    }

    /// The path without its last segment, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(AnchorPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn has_prefix(&self, prefix: &AnchorPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix.segments == self.segments[..prefix.segments.len()]
    }
}

impl fmt::Display for AnchorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

impl std::str::FromStr for AnchorPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
