//! Key paths for the hierarchical document store.
//!
//! Everything in the store is addressed by an ordered sequence of
//! segments. Integer segments order numerically and sort ahead of string
//! segments, which is what makes date-keyed indices chronological by
//! construction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of a key path.
///
/// A segment whose textual form is a canonical non-negative integer is
/// normalized to `Int`, so `"42"` and `42` address the same node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Numeric segment (dates, array positions, counters).
    Int(i64),
    /// Textual segment.
    Str(String),
}

impl Segment {
    /// Parses a textual key into a segment, normalizing canonical
    /// non-negative integers to `Int`.
    #[must_use]
    pub fn parse(key: &str) -> Self {
        if is_canonical_index(key) {
            if let Ok(n) = key.parse::<i64>() {
                return Self::Int(n);
            }
        }
        Self::Str(key.to_string())
    }

    /// Returns the integer value if this is a numeric segment.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }
}

// "0" is canonical; "00", "01" and "1e3" are not. Leading '-' is never
// produced by array decomposition, so negatives stay textual.
fn is_canonical_index(key: &str) -> bool {
    let bytes = key.as_bytes();
    match bytes {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        _ => bytes.iter().all(u8::is_ascii_digit),
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Self::parse(&key)
    }
}

impl From<i64> for Segment {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<usize> for Segment {
    fn from(n: usize) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

/// An ordered sequence of segments addressing one node in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPath(Vec<Segment>);

impl KeyPath {
    /// Creates an empty path (the store root).
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Creates a path from segments.
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Returns a new path with one more segment appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns a new path with another path appended.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// The segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// True if this is the store root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "$");
        }
        let mut first = true;
        for segment in &self.0 {
            if first {
                write!(f, "{segment}")?;
                first = false;
            } else {
                write!(f, ".{segment}")?;
            }
        }
        Ok(())
    }
}

impl<S: Into<Segment>> FromIterator<S> for KeyPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Builds a [`KeyPath`] from a comma-separated list of segment values.
///
/// ```
/// use clinicache::store::Segment;
/// use clinicache::path;
///
/// let p = path!["by_patient", 9_999_999_000_i64, "procedures"];
/// assert_eq!(p.segments().len(), 3);
/// assert_eq!(p.segments()[1], Segment::Int(9_999_999_000));
/// ```
#[macro_export]
macro_rules! path {
    () => { $crate::store::KeyPath::root() };
    ($($segment:expr),+ $(,)?) => {
        $crate::store::KeyPath::new(vec![$($crate::store::Segment::from($segment)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_canonical_integers() {
        assert_eq!(Segment::parse("42"), Segment::Int(42));
        assert_eq!(Segment::parse("0"), Segment::Int(0));
        assert_eq!(Segment::parse("007"), Segment::Str("007".to_string()));
        assert_eq!(Segment::parse("-3"), Segment::Str("-3".to_string()));
        assert_eq!(Segment::parse("4x"), Segment::Str("4x".to_string()));
        assert_eq!(Segment::parse(""), Segment::Str(String::new()));
    }

    #[test]
    fn test_int_segments_sort_before_strings_and_numerically() {
        let mut segments = vec![
            Segment::from("b"),
            Segment::Int(10),
            Segment::from("a"),
            Segment::Int(9),
        ];
        segments.sort();
        assert_eq!(
            segments,
            vec![
                Segment::Int(9),
                Segment::Int(10),
                Segment::from("a"),
                Segment::from("b"),
            ]
        );
    }

    #[test]
    fn test_path_child_and_join() {
        let base = path!["by_patient", 123_i64];
        let full = base.child("procedures").child("by_date");
        assert_eq!(full.len(), 4);
        assert_eq!(full.segments()[0], Segment::from("by_patient"));

        let joined = base.join(&path!["procedures"]);
        assert_eq!(joined.len(), 3);
    }

    #[test]
    fn test_path_display() {
        assert_eq!(KeyPath::root().to_string(), "$");
        assert_eq!(path!["status", 42_i64].to_string(), "status.42");
    }

    #[test]
    fn test_macro_normalizes_string_integers() {
        // "1622505600000" addresses the same node as the integer form.
        let textual = path!["by_date", "1622505600000"];
        let numeric = path!["by_date", 1_622_505_600_000_i64];
        assert_eq!(textual, numeric);
    }
}
