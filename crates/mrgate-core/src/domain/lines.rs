//! Line ranges claimed by rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive, 1-based range of lines within one file.
///
/// # Invariants
///
/// `1 <= start_line <= end_line`. The constructor reorders and clamps its
/// inputs so the invariant always holds.
///
/// A *placeholder* reads as `(1, 1)` but claims the section as a whole and
/// leaves the exact span to the engine's section extraction. Only
/// [`LineRange::placeholder`] makes one; `new(path, 1, 1)` claims line 1.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start_line: u32,
    pub end_line: u32,
    pub file_path: String,
    #[serde(skip)]
    whole_section: bool,
}

impl LineRange {
    pub fn new(file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        let (start, end) = if start_line <= end_line {
            (start_line, end_line)
        } else {
            (end_line, start_line)
        };
        Self {
            start_line: start.max(1),
            end_line: end.max(1),
            file_path: file_path.into(),
            whole_section: false,
        }
    }

    /// Claim the whole section without naming lines.
    pub fn placeholder(file_path: impl Into<String>) -> Self {
        Self {
            whole_section: true,
            ..Self::new(file_path, 1, 1)
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.whole_section
    }

    pub fn contains(&self, line: u32) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }

    pub fn lines(&self) -> impl Iterator<Item = u32> {
        self.start_line..=self.end_line
    }

    /// Collapse ascending line numbers into maximal contiguous ranges.
    pub fn compress(file_path: &str, lines: impl IntoIterator<Item = u32>) -> Vec<LineRange> {
        let mut sorted: Vec<u32> = lines.into_iter().filter(|l| *l > 0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut out = Vec::new();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return out;
        };
        let (mut start, mut end) = (first, first);
        for line in iter {
            if line == end + 1 {
                end = line;
            } else {
                out.push(LineRange::new(file_path, start, end));
                start = line;
                end = line;
            }
        }
        out.push(LineRange::new(file_path, start, end));
        out
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}", self.file_path, self.start_line)
        } else {
            write!(f, "{}:{}-{}", self.file_path, self.start_line, self.end_line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reorders_and_clamps() {
        let r = LineRange::new("a.yaml", 5, 2);
        assert_eq!((r.start_line, r.end_line), (2, 5));
        let r = LineRange::new("a.yaml", 0, 0);
        assert_eq!((r.start_line, r.end_line), (1, 1));
        assert!(!r.is_placeholder());
    }

    #[test]
    fn test_placeholder_is_distinct_from_line_one() {
        let p = LineRange::placeholder("a.yaml");
        assert!(p.is_placeholder());
        assert_eq!((p.start_line, p.end_line), (1, 1));
        assert_ne!(p, LineRange::new("a.yaml", 1, 1));
        assert_eq!(p.to_string(), "a.yaml:1");
    }

    #[test]
    fn test_compress_groups_contiguous_lines() {
        let ranges = LineRange::compress("a.yaml", [7, 1, 2, 3, 9, 8, 12]);
        let shown: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(shown, vec!["a.yaml:1-3", "a.yaml:7-9", "a.yaml:12"]);
    }

    #[test]
    fn test_compress_empty() {
        assert!(LineRange::compress("a.yaml", Vec::new()).is_empty());
    }

    #[test]
    fn test_contains_and_lines() {
        let r = LineRange::new("a.yaml", 3, 6);
        assert!(r.contains(3));
        assert!(r.contains(6));
        assert!(!r.contains(7));
        assert_eq!(r.lines().count(), 4);
    }
}
