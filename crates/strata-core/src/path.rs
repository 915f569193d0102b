use std::fmt;
use std::str::FromStr;

use crate::error::FsError;

/// Normalized POSIX-style path: an ordered list of non-empty name segments.
///
/// Construction collapses repeated and trailing slashes and rejects `.` and
/// `..` segments, so two equal paths always render identically (`/a/b`, or
/// `/` for the root).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment; `None` for the root.
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn join(&self, name: &str) -> Result<Path, FsError> {
        validate_segment(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Path { segments })
    }

    pub fn join_all<I, S>(&self, names: I) -> Result<Path, FsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut segments = self.segments.clone();
        for name in names {
            let name = name.as_ref();
            validate_segment(name)?;
            segments.push(name.to_string());
        }
        Ok(Path { segments })
    }

    /// True iff `self` equals `prefix` or lives strictly under it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Path of `self` relative to `prefix`, or `None` when `self` is not
    /// under `prefix`.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Path {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

fn validate_segment(segment: &str) -> Result<(), FsError> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(FsError::io_message(format!(
            "invalid path segment: {segment:?}"
        )));
    }
    if segment.contains('/') {
        return Err(FsError::io_message(format!(
            "path segment contains '/': {segment:?}"
        )));
    }
    Ok(())
}

impl FromStr for Path {
    type Err = FsError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for part in input.split('/') {
            if part.is_empty() {
                continue;
            }
            if part == "." || part == ".." {
                return Err(FsError::io_message(format!(
                    "invalid path segment in {input:?}: {part:?}"
                )));
            }
            segments.push(part.to_string());
        }
        Ok(Path { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl serde::Serialize for Path {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Path {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::Path;

    #[test]
    fn parse_normalizes_slashes() {
        let p: Path = "/a//b/".parse().unwrap();
        assert_eq!(p.to_string(), "/a/b");
        assert_eq!(p.segments(), ["a", "b"]);

        let root: Path = "/".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");

        let empty: Path = "".parse().unwrap();
        assert!(empty.is_root());
    }

    #[test]
    fn parse_rejects_dot_segments() {
        assert!("/a/./b".parse::<Path>().is_err());
        assert!("/a/../b".parse::<Path>().is_err());
    }

    #[test]
    fn join_rejects_invalid_segments() {
        let p = Path::root();
        assert!(p.join("").is_err());
        assert!(p.join(".").is_err());
        assert!(p.join("..").is_err());
        assert!(p.join("a/b").is_err());
        assert_eq!(p.join("a").unwrap().to_string(), "/a");
    }

    #[test]
    fn parent_and_filename() {
        let p: Path = "/a/b/c".parse().unwrap();
        assert_eq!(p.filename(), Some("c"));
        assert_eq!(p.parent().unwrap().to_string(), "/a/b");
        assert_eq!(Path::root().parent(), None);
        assert_eq!(Path::root().filename(), None);
    }

    #[test]
    fn prefix_relations() {
        let base: Path = "/a/b".parse().unwrap();
        let deep: Path = "/a/b/c/d".parse().unwrap();
        let other: Path = "/a/bc".parse().unwrap();

        assert!(deep.starts_with(&base));
        assert!(base.starts_with(&base));
        assert!(!other.starts_with(&base));
        assert!(deep.starts_with(&Path::root()));

        assert_eq!(deep.strip_prefix(&base).unwrap().to_string(), "/c/d");
        assert_eq!(base.strip_prefix(&base).unwrap(), Path::root());
        assert!(other.strip_prefix(&base).is_none());
    }

    #[test]
    fn serde_round_trip() {
        let p: Path = "/x/y".parse().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"/x/y\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
