//! Section extraction.
//!
//! A document is parsed once into a `serde_yaml::Value`; each configured
//! section is then resolved twice against it: as a value (for the rules) and
//! as a line span in the source text (for the coverage check). Span finding
//! is textual and understands block-style YAML; when it cannot place a
//! section the engine falls back to the whole document.

use serde_yaml::Value;

use mrgate_repo::FileChange;

use crate::config::{ParserKind, SectionSelector};
use crate::domain::error::GateError;
use crate::domain::lines::LineRange;

/// One section handed to a rule.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    /// Configured section name.
    pub name: &'a str,
    pub file_path: &'a str,
    pub change: &'a FileChange,
    /// Full new-side text of the file.
    pub content: &'a str,
    /// Parsed sub-tree selected by the section's `yaml_path`.
    pub value: &'a Value,
    /// Lines of `content` the section occupies; `None` for empty content.
    pub span: Option<(u32, u32)>,
}

impl<'a> Section<'a> {
    /// True for deletions and for files whose new side is empty.
    pub fn is_deletion(&self) -> bool {
        self.change.deleted_file || self.content.trim().is_empty()
    }

    /// Range covering the whole section, or a placeholder when it has no lines.
    pub fn whole_range(&self) -> LineRange {
        match self.span {
            Some((start, end)) => LineRange::new(self.file_path, start, end),
            None => LineRange::placeholder(self.file_path),
        }
    }

    /// Ranges of every `key:` block inside the section.
    pub fn blocks(&self, key: &str) -> Vec<LineRange> {
        block_spans(self.content, key)
            .into_iter()
            .filter(|(start, _)| match self.span {
                Some((lo, hi)) => (lo..=hi).contains(start),
                None => false,
            })
            .map(|(start, end)| LineRange::new(self.file_path, start, end))
            .collect()
    }
}

/// Parse file content into a YAML value. Empty content parses to `Null`.
pub fn parse_document(path: &str, content: &str, parser: ParserKind) -> Result<Value, GateError> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parse_err = |message: String| GateError::Parse {
        path: path.to_string(),
        message,
    };
    match parser {
        ParserKind::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
        ParserKind::Json => {
            let json: serde_json::Value =
                serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;
            serde_yaml::to_value(json).map_err(|e| parse_err(e.to_string()))
        }
    }
}

/// Resolve a selector against a parsed document.
pub fn extract<'v>(root: &'v Value, selector: &SectionSelector) -> Option<&'v Value> {
    let segments = match selector {
        SectionSelector::WholeDocument => return Some(root),
        SectionSelector::Path(segments) => segments,
    };
    segments.iter().try_fold(root, |node, seg| {
        if let Ok(index) = seg.parse::<usize>() {
            if let Some(item) = node.as_sequence().and_then(|s| s.get(index)) {
                return Some(item);
            }
        }
        node.get(seg.as_str())
    })
}

// ---------------------------------------------------------------------------
// Textual span finding
// ---------------------------------------------------------------------------

fn is_significant(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && !t.starts_with('#') && t != "---"
}

fn raw_indent(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Indentation of the mapping key on this line (after any `- `) and the key.
fn key_of(line: &str) -> Option<(usize, &str)> {
    let mut indent = raw_indent(line);
    let mut rest = &line[indent..];
    while let Some(after) = rest.strip_prefix("- ") {
        let pad = after.len() - after.trim_start_matches(' ').len();
        indent += 2 + pad;
        rest = &after[pad..];
    }
    let colon = rest.find(':')?;
    let after = &rest[colon + 1..];
    if !(after.is_empty() || after.starts_with(' ')) {
        return None;
    }
    let key = rest[..colon].trim().trim_matches(|c| c == '"' || c == '\'');
    if key.is_empty() || key.starts_with('#') {
        return None;
    }
    Some((indent, key))
}

fn is_item(line: &str) -> bool {
    let t = line.trim_start();
    t == "-" || t.starts_with("- ")
}

/// Exclusive end index of the block owned by the key at `idx`.
fn key_block_end(lines: &[&str], idx: usize, limit: usize) -> usize {
    let Some((key_indent, _)) = key_of(lines[idx]) else {
        return idx + 1;
    };
    let mut end = idx + 1;
    while end < limit {
        let line = lines[end];
        if is_significant(line) {
            let indent = raw_indent(line);
            let same_level_sequence = indent == key_indent && is_item(line);
            if indent < key_indent || (indent == key_indent && !same_level_sequence) {
                break;
            }
        }
        end += 1;
    }
    end
}

/// Exclusive end index of the sequence item starting at `idx`.
fn item_block_end(lines: &[&str], idx: usize, limit: usize) -> usize {
    let item_indent = raw_indent(lines[idx]);
    let mut end = idx + 1;
    while end < limit {
        let line = lines[end];
        if is_significant(line) && raw_indent(line) <= item_indent {
            break;
        }
        end += 1;
    }
    end
}

/// Trim trailing blank/comment lines; returns 1-based inclusive span.
fn to_span(lines: &[&str], start: usize, end: usize) -> (u32, u32) {
    let mut last = start;
    for (i, line) in lines.iter().enumerate().take(end).skip(start) {
        if is_significant(line) {
            last = i;
        }
    }
    (start as u32 + 1, last as u32 + 1)
}

/// Line span of a section inside `content`, or `None` when it cannot be located.
pub fn section_span(content: &str, selector: &SectionSelector) -> Option<(u32, u32)> {
    let lines: Vec<&str> = content.lines().collect();
    if !lines.iter().any(|l| is_significant(l)) {
        return None;
    }
    let segments = match selector {
        SectionSelector::WholeDocument => return Some((1, lines.len() as u32)),
        SectionSelector::Path(segments) => segments,
    };

    let (mut lo, mut hi) = (0usize, lines.len());
    let mut span = None;
    for seg in segments {
        let first = (lo..hi).find(|&i| is_significant(lines[i]))?;

        if let Ok(n) = seg.parse::<usize>() {
            let item_indent = raw_indent(lines[first]);
            let idx = (lo..hi)
                .filter(|&i| {
                    is_significant(lines[i]) && raw_indent(lines[i]) == item_indent && is_item(lines[i])
                })
                .nth(n)?;
            let end = item_block_end(&lines, idx, hi);
            span = Some(to_span(&lines, idx, end));
            // The item line itself may carry the first key of the item.
            lo = idx;
            hi = end;
        } else {
            let (child_indent, _) = key_of(lines[first])?;
            let idx = (lo..hi).find(|&i| {
                is_significant(lines[i])
                    && matches!(key_of(lines[i]), Some((ind, key)) if ind == child_indent && key == seg)
            })?;
            let end = key_block_end(&lines, idx, hi);
            span = Some(to_span(&lines, idx, end));
            lo = idx + 1;
            hi = end;
        }
    }
    span
}

/// Spans of every `key:` block in `content`, at any depth.
pub fn block_spans(content: &str, key: &str) -> Vec<(u32, u32)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if !is_significant(line) {
            continue;
        }
        if matches!(key_of(line), Some((_, k)) if k == key) {
            let end = key_block_end(&lines, idx, lines.len());
            spans.push(to_span(&lines, idx, end));
        }
    }
    spans
}

/// 1-based numbers of lines that carry content (not blank, not comment).
pub fn significant_lines(content: &str) -> Vec<u32> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| is_significant(l))
        .map(|(i, _)| i as u32 + 1)
        .collect()
}

/// Remove every top-level `key:` block from `content`.
pub fn strip_block(content: &str, key: &str) -> String {
    strip_where(content, key, |indent| indent == 0)
}

/// Remove every `key:` block from `content`, at any depth.
pub fn strip_nested_blocks(content: &str, key: &str) -> String {
    strip_where(content, key, |_| true)
}

fn strip_where(content: &str, key: &str, at: impl Fn(usize) -> bool) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        if matches!(key_of(line), Some((indent, k)) if k == key && at(indent)) {
            idx = key_block_end(&lines, idx, lines.len());
            continue;
        }
        out.push(line);
        idx += 1;
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT: &str = "\
name: analytics
kind: aggregate
warehouses:
  - type: user
    size: XSMALL
  - type: service
    size: SMALL

data_product_db:
  - name: db
    presentation_schemas:
      - name: marts
        consumers:
          - name: finance
            kind: data_product
tags:
  dataProduct: analytics
";

    fn path(p: &str) -> SectionSelector {
        SectionSelector::parse(p)
    }

    #[test]
    fn test_whole_document_span() {
        assert_eq!(section_span(PRODUCT, &SectionSelector::WholeDocument), Some((1, 17)));
        assert_eq!(section_span("", &SectionSelector::WholeDocument), None);
        assert_eq!(section_span("# only a comment\n", &SectionSelector::WholeDocument), None);
    }

    #[test]
    fn test_top_level_key_span_excludes_trailing_blank() {
        assert_eq!(section_span(PRODUCT, &path("warehouses")), Some((3, 7)));
        assert_eq!(section_span(PRODUCT, &path("tags")), Some((16, 17)));
        assert_eq!(section_span(PRODUCT, &path("name")), Some((1, 1)));
    }

    #[test]
    fn test_nested_span_through_sequence_index() {
        assert_eq!(
            section_span(PRODUCT, &path("data_product_db.0.presentation_schemas")),
            Some((11, 15))
        );
        assert_eq!(section_span(PRODUCT, &path("warehouses.1")), Some((6, 7)));
    }

    #[test]
    fn test_missing_path_has_no_span() {
        assert_eq!(section_span(PRODUCT, &path("owners")), None);
        assert_eq!(section_span(PRODUCT, &path("warehouses.5")), None);
    }

    #[test]
    fn test_same_indent_sequence_belongs_to_key() {
        let content = "consumers:\n- name: a\n  kind: b\nother: 1\n";
        assert_eq!(section_span(content, &path("consumers")), Some((1, 3)));
    }

    #[test]
    fn test_extract_values() {
        let root = parse_document("p.yaml", PRODUCT, ParserKind::Yaml).unwrap();
        let wh = extract(&root, &path("warehouses")).unwrap();
        assert_eq!(wh.as_sequence().unwrap().len(), 2);
        let size = extract(&root, &path("warehouses.1.size")).unwrap();
        assert_eq!(size.as_str(), Some("SMALL"));
        assert!(extract(&root, &path("owners")).is_none());
        assert!(extract(&root, &SectionSelector::WholeDocument).is_some());
    }

    #[test]
    fn test_parse_json_and_errors() {
        let v = parse_document("a.json", r#"{"name": "x"}"#, ParserKind::Json).unwrap();
        assert_eq!(v.get("name").and_then(Value::as_str), Some("x"));
        assert!(parse_document("a.yaml", "", ParserKind::Yaml).unwrap().is_null());
        let err = parse_document("a.yaml", "a: [1, 2\n", ParserKind::Yaml).unwrap_err();
        assert!(matches!(err, GateError::Parse { .. }));
    }

    #[test]
    fn test_block_spans_find_nested_keys() {
        assert_eq!(block_spans(PRODUCT, "consumers"), vec![(13, 15)]);
        assert_eq!(block_spans(PRODUCT, "warehouses"), vec![(3, 7)]);
    }

    #[test]
    fn test_strip_block_removes_top_level_only() {
        let stripped = strip_block(PRODUCT, "warehouses");
        assert!(!stripped.contains("XSMALL"));
        assert!(stripped.contains("name: analytics"));
        assert!(stripped.contains("consumers:"));
    }

    #[test]
    fn test_strip_nested_blocks_reaches_any_depth() {
        let stripped = strip_nested_blocks(PRODUCT, "consumers");
        assert!(!stripped.contains("consumers:"));
        assert!(!stripped.contains("finance"));
        assert!(stripped.contains("      - name: marts"));
        assert!(stripped.contains("tags:"));
    }

    #[test]
    fn test_significant_lines_skip_blanks_and_comments() {
        assert_eq!(significant_lines("a: 1\n\n# c\nb: 2\n"), vec![1, 4]);
    }
}
