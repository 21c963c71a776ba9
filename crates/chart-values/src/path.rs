//! Dot-delimited addressing of locations inside a values tree.
//!
//! A [`Path`] is an ordered, non-empty list of segments. Its canonical
//! textual form joins the segments with [`DELIMITER`], so `image.tag`
//! addresses the `tag` key below the top-level `image` mapping.
//!
//! ```
//! use std::str::FromStr;
//! use chart_values::path::Path;
//!
//! let path = Path::from_str("image.tag").unwrap();
//! assert_eq!(path.segments(), ["image", "tag"]);
//! assert_eq!(path.to_string(), "image.tag");
//! ```
//!
//! Segments which themselves contain the delimiter can be represented (the
//! flatten transform builds paths from keys directly), but their canonical
//! form does not decode back to the same path. [`Path::is_canonical`] reports
//! this, and the schema lint surfaces such keys to chart authors.
use std::{fmt::Display, str::FromStr};

use snafu::{Snafu, ensure};

mod serde;

/// The character separating the segments in the canonical form of a [`Path`].
pub const DELIMITER: char = '.';

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum PathError {
    #[snafu(display("path input cannot be empty"))]
    EmptyInput,

    #[snafu(display("path {input:?} contains an empty segment at position {position}"))]
    EmptySegment { input: String, position: usize },

    #[snafu(display("a path needs at least one segment"))]
    NoSegments,
}

/// Joins `segments` with the [`DELIMITER`].
pub fn encode<S: AsRef<str>>(segments: &[S]) -> String {
    let mut encoded = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            encoded.push(DELIMITER);
        }
        encoded.push_str(segment.as_ref());
    }
    encoded
}

/// Splits `input` on the [`DELIMITER`].
///
/// This is the exact inverse of [`encode`] for segments which are non-empty
/// and don't contain the delimiter.
pub fn decode(input: &str) -> Result<Vec<String>, PathError> {
    ensure!(!input.is_empty(), EmptyInputSnafu);

    input
        .split(DELIMITER)
        .enumerate()
        .map(|(position, segment)| {
            ensure!(
                !segment.is_empty(),
                EmptySegmentSnafu {
                    input: input.to_owned(),
                    position
                }
            );
            Ok(segment.to_owned())
        })
        .collect()
}

/// A location inside a values tree.
///
/// Two paths are equal if and only if their segment lists are equal. The
/// ordering is lexicographic by segment, which keeps a parent directly in
/// front of its children when paths are sorted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<String>);

impl Path {
    /// Creates a single-segment path.
    pub fn root(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`, a path has at least one segment.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The last segment, which names the leaf.
    pub fn leaf(&self) -> &str {
        // Construction guarantees at least one segment
        self.0.last().map_or("", String::as_str)
    }

    /// The path without its last segment, [`None`] for single-segment paths.
    pub fn parent(&self) -> Option<Self> {
        (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Iterates over every strict prefix of this path, shortest first.
    ///
    /// `a.b.c` yields `a` and `a.b`.
    pub fn ancestors(&self) -> impl Iterator<Item = Self> + '_ {
        (1..self.0.len()).map(|len| Self(self.0[..len].to_vec()))
    }

    /// Returns `true` if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns `true` if the canonical form decodes back to this path.
    pub fn is_canonical(&self) -> bool {
        self.0
            .iter()
            .all(|segment| !segment.is_empty() && !segment.contains(DELIMITER))
    }
}

impl TryFrom<Vec<String>> for Path {
    type Error = PathError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        ensure!(!segments.is_empty(), NoSegmentsSnafu);
        Ok(Self(segments))
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        decode(input).map(Self)
    }
}

impl TryFrom<&str> for Path {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&encode(&self.0))
    }
}

impl From<&Path> for String {
    fn from(value: &Path) -> Self {
        value.to_string()
    }
}
