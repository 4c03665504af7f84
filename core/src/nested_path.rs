//! Virtual path addressing that can cross archive boundaries.
//!
//! A `NestedPath` is an ordered sequence of string segments. Each segment is a
//! `/`-separated path inside one container: the first segment addresses a
//! physical location, every following segment addresses a location inside the
//! archive named by the previous segment. `["/pics/a.zip", "inner/b.zip",
//! "img/cat.png"]` is a png inside a zip inside a zip.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on segment count. Guards against unbounded recursive nesting
/// being representable at all.
pub const MAX_DEPTH: usize = 32;

/// Upper bound on the byte length of a single segment.
pub const MAX_SEGMENT_LEN: usize = 4096;

/// Immutable value type; equality, ordering and hashing are structural over
/// the segment sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedPath {
    segments: Vec<String>,
}

impl NestedPath {
    /// The empty path (depth 0).
    pub fn empty() -> Self {
        Self { segments: Vec::new() }
    }

    /// A single-segment path naming a physical filesystem location.
    /// Backslashes are normalized to `/`.
    pub fn from_physical(path: &Path) -> Result<Self> {
        Self::empty().combine(&path.to_string_lossy())
    }

    /// Builds a path from raw segments, applying the same bounds checks as
    /// `combine`.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::empty();
        for s in segments {
            out = out.combine(s.as_ref())?;
        }
        Ok(out)
    }

    /// Returns a new path with `segment` appended. This is how a path crosses
    /// an archive boundary: the archive file's own path, then a new segment
    /// for the location inside it.
    pub fn combine(&self, segment: &str) -> Result<Self> {
        if self.segments.len() + 1 > MAX_DEPTH {
            return Err(Error::PathTooDeep {
                depth: self.segments.len() + 1,
                limit: MAX_DEPTH,
            });
        }
        if segment.len() > MAX_SEGMENT_LEN {
            return Err(Error::SegmentTooLong {
                len: segment.len(),
                limit: MAX_SEGMENT_LEN,
            });
        }
        let mut segments = self.segments.clone();
        segments.push(normalize(segment));
        Ok(Self { segments })
    }

    /// Rebases `other`'s segments onto `self`. Used to address a location
    /// inside an archive given the archive's path and an interior path.
    pub fn union(&self, other: &NestedPath) -> Result<Self> {
        let mut out = self.clone();
        for seg in &other.segments {
            out = out.combine(seg)?;
        }
        Ok(out)
    }

    /// Returns a new path whose last segment is extended by `/name`. This is
    /// how a child at the same nesting level (one more directory step inside
    /// the same filesystem or archive) is addressed. An empty or
    /// empty-trailing path gains `name` as the segment content instead.
    pub fn join(&self, name: &str) -> Result<Self> {
        let name = normalize(name);
        match self.segments.last() {
            None => self.combine(&name),
            Some(last) => {
                let joined = if last.is_empty() {
                    name
                } else {
                    format!("{}/{}", last.trim_end_matches('/'), name)
                };
                if joined.len() > MAX_SEGMENT_LEN {
                    return Err(Error::SegmentTooLong {
                        len: joined.len(),
                        limit: MAX_SEGMENT_LEN,
                    });
                }
                let mut segments = self.segments.clone();
                if let Some(slot) = segments.last_mut() {
                    *slot = joined;
                }
                Ok(Self { segments })
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when `self`'s segment sequence is a prefix of `other`'s.
    pub fn is_prefix_of(&self, other: &NestedPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// The last `/`-component of the last non-empty segment.
    pub fn name(&self) -> &str {
        self.segments
            .iter()
            .rev()
            .find(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').rsplit('/').next().unwrap_or(""))
            .unwrap_or("")
    }

    /// The extension of `name()`, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                Some(ext.to_ascii_lowercase())
            }
            _ => None,
        }
    }

    /// Stable, collision-free textual encoding (a JSON array of segments).
    /// Unlike `Display`, this form is exactly invertible.
    pub fn to_encoded_string(&self) -> String {
        serde_json::to_string(&self.segments).unwrap_or_default()
    }
}

impl fmt::Display for NestedPath {
    /// Human-readable form: segments joined by `/`. Lossy when a segment
    /// itself contains `/`; use `to_encoded_string` for an invertible form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(seg)?;
            first = false;
        }
        Ok(())
    }
}

fn normalize(segment: &str) -> String {
    segment.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_appends_segments() {
        let p = NestedPath::from_physical(Path::new("/data/root")).unwrap();
        let q = p.combine("a").unwrap().combine("b").unwrap();
        assert_eq!(q.depth(), p.depth() + 2);
        assert_eq!(q.name(), "b");
    }

    #[test]
    fn join_extends_last_segment() {
        let p = NestedPath::from_physical(Path::new("/data/root")).unwrap();
        let q = p.join("sub").unwrap().join("file.txt").unwrap();
        assert_eq!(q.depth(), 1);
        assert_eq!(q.segments()[0], "/data/root/sub/file.txt");
        assert_eq!(q.name(), "file.txt");
        assert_eq!(q.extension().as_deref(), Some("txt"));
    }

    #[test]
    fn join_fills_empty_trailing_segment() {
        let archive = NestedPath::from_physical(Path::new("/a.zip")).unwrap();
        let root = archive.combine("").unwrap();
        assert_eq!(root.name(), "a.zip");
        let inner = root.join("inner/pic.png").unwrap();
        assert_eq!(inner.segments(), &["/a.zip", "inner/pic.png"]);
        assert_eq!(inner.name(), "pic.png");
        assert!(archive.is_prefix_of(&inner));
    }

    #[test]
    fn union_rebases_segments() {
        let a = NestedPath::from_physical(Path::new("/a.zip")).unwrap();
        let b = NestedPath::from_segments(["inner/b.zip", "img/cat.png"]).unwrap();
        let u = a.union(&b).unwrap();
        assert_eq!(u.depth(), 3);
        assert_eq!(u.name(), "cat.png");
        assert!(a.is_prefix_of(&u));
        assert!(!b.is_prefix_of(&u));
    }

    #[test]
    fn ordering_is_segmentwise_lexicographic() {
        let mut v = vec![
            NestedPath::from_segments(["b"]).unwrap(),
            NestedPath::from_segments(["a", "z"]).unwrap(),
            NestedPath::from_segments(["a"]).unwrap(),
        ];
        v.sort();
        let names: Vec<_> = v.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["a", "a/z", "b"]);
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut p = NestedPath::empty();
        for i in 0..MAX_DEPTH {
            p = p.combine(&format!("s{}", i)).unwrap();
        }
        match p.combine("one-too-many") {
            Err(Error::PathTooDeep { depth, limit }) => {
                assert_eq!(depth, MAX_DEPTH + 1);
                assert_eq!(limit, MAX_DEPTH);
            }
            other => panic!("expected PathTooDeep, got {:?}", other),
        }
    }

    #[test]
    fn segment_length_limit_is_enforced() {
        let long = "x".repeat(MAX_SEGMENT_LEN + 1);
        match NestedPath::empty().combine(&long) {
            Err(Error::SegmentTooLong { len, .. }) => assert_eq!(len, long.len()),
            other => panic!("expected SegmentTooLong, got {:?}", other),
        }
    }

    #[test]
    fn encoded_form_round_trips() {
        let p = NestedPath::from_segments(["C:\\data\\a.zip", "in/b.png"]).unwrap();
        // Backslashes were normalized on construction.
        assert_eq!(p.segments()[0], "C:/data/a.zip");
        let encoded = p.to_encoded_string();
        let segments: Vec<String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(NestedPath::from_segments(&segments).unwrap(), p);
    }
}
