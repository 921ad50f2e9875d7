//! Merge-request model shared by every collaborator and the rule engine.
//!
//! A [`FileChange`] mirrors one entry of a forge "MR changes" payload: the
//! paths on both sides, three lifecycle flags and the unified diff text.
//! [`MrContext`] bundles the changes with the MR metadata. Both are built
//! once per evaluation and never mutated afterwards.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One changed file within a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
    /// Unified diff text (hunks only, or with `---`/`+++` headers).
    #[serde(default)]
    pub diff: String,
}

/// Classification of a single diff body line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
}

/// A body line of a unified diff with its new-side line number, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine<'a> {
    pub kind: DiffLineKind,
    pub text: &'a str,
    /// 1-based line number on the new side (`None` for removed lines).
    pub new_line: Option<u32>,
    /// New-side line this entry occupies; removed lines report the line
    /// they sit in front of.
    pub position: u32,
}

/// New-side text rebuilt from the diff alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuiltContent {
    pub text: String,
    /// Line numbers, within `text`, of added lines.
    pub added: BTreeSet<u32>,
    /// Positions, within `text`, of removed lines that carried content.
    pub removals: BTreeSet<u32>,
}

fn carries_content(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty() && !t.starts_with('#')
}

impl FileChange {
    /// A brand-new file whose diff adds every line of `content`.
    pub fn added(path: impl Into<String>, content: &str) -> Self {
        let path = path.into();
        let lines: Vec<&str> = content.lines().collect();
        let mut diff = format!("@@ -0,0 +1,{} @@\n", lines.len());
        for line in &lines {
            diff.push('+');
            diff.push_str(line);
            diff.push('\n');
        }
        Self {
            old_path: path.clone(),
            new_path: path,
            new_file: true,
            renamed_file: false,
            deleted_file: false,
            diff,
        }
    }

    /// A modification described by an explicit diff.
    pub fn modified(path: impl Into<String>, diff: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            old_path: path.clone(),
            new_path: path,
            new_file: false,
            renamed_file: false,
            deleted_file: false,
            diff: diff.into(),
        }
    }

    /// A deletion whose diff removes every line of `old_content`.
    pub fn deleted(path: impl Into<String>, old_content: &str) -> Self {
        let path = path.into();
        let lines: Vec<&str> = old_content.lines().collect();
        let mut diff = format!("@@ -1,{} +0,0 @@\n", lines.len());
        for line in &lines {
            diff.push('-');
            diff.push_str(line);
            diff.push('\n');
        }
        Self {
            old_path: path.clone(),
            new_path: path,
            new_file: false,
            renamed_file: false,
            deleted_file: true,
            diff,
        }
    }

    /// The path to judge: the new path, or the old one for deletions without a new path.
    pub fn path(&self) -> &str {
        if self.new_path.is_empty() {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    /// Whether the diff carries no content at all.
    pub fn is_empty_diff(&self) -> bool {
        self.diff.trim().is_empty()
    }

    /// Parse the diff body into classified lines.
    ///
    /// Lines before the first `@@` header are file headers and skipped. A diff
    /// without any hunk header is read as a single hunk starting at line 1.
    pub fn diff_lines(&self) -> Vec<DiffLine<'_>> {
        if self.is_empty_diff() {
            return Vec::new();
        }
        let has_hunks = self.diff.lines().any(|l| l.starts_with("@@"));
        let mut in_hunk = !has_hunks;
        let mut next_new: u32 = 1;
        let mut out = Vec::new();

        for raw in self.diff.lines() {
            if raw.starts_with("@@") {
                in_hunk = true;
                next_new = parse_new_start(raw).unwrap_or(1).max(1);
                continue;
            }
            if !in_hunk || is_file_header(raw, has_hunks) {
                continue;
            }
            if let Some(text) = raw.strip_prefix('+') {
                out.push(DiffLine {
                    kind: DiffLineKind::Added,
                    text,
                    new_line: Some(next_new),
                    position: next_new,
                });
                next_new += 1;
            } else if let Some(text) = raw.strip_prefix('-') {
                out.push(DiffLine {
                    kind: DiffLineKind::Removed,
                    text,
                    new_line: None,
                    position: next_new,
                });
            } else if raw.starts_with('\\') {
                // "\ No newline at end of file"
                continue;
            } else {
                let text = raw.strip_prefix(' ').unwrap_or(raw);
                out.push(DiffLine {
                    kind: DiffLineKind::Context,
                    text,
                    new_line: Some(next_new),
                    position: next_new,
                });
                next_new += 1;
            }
        }
        out
    }

    /// Text of every added line, without the `+` marker.
    pub fn added_lines(&self) -> Vec<&str> {
        self.diff_lines()
            .into_iter()
            .filter(|l| l.kind == DiffLineKind::Added)
            .map(|l| l.text)
            .collect()
    }

    /// Text of every removed line, without the `-` marker.
    pub fn removed_lines(&self) -> Vec<&str> {
        self.diff_lines()
            .into_iter()
            .filter(|l| l.kind == DiffLineKind::Removed)
            .map(|l| l.text)
            .collect()
    }

    /// New-side line numbers of every added line.
    pub fn added_line_numbers(&self) -> BTreeSet<u32> {
        self.diff_lines()
            .into_iter()
            .filter(|l| l.kind == DiffLineKind::Added)
            .filter_map(|l| l.new_line)
            .collect()
    }

    /// New-side positions of removed lines that carried content. A removal
    /// at the end of the file reports the line after the last one.
    pub fn removal_positions(&self) -> BTreeSet<u32> {
        self.diff_lines()
            .into_iter()
            .filter(|l| l.kind == DiffLineKind::Removed && carries_content(l.text))
            .map(|l| l.position)
            .collect()
    }

    /// Rebuild the new-side text visible in the diff (context + added lines).
    ///
    /// For new files this is the whole file. Line numbers in the result refer
    /// to the rebuilt text, not to the real file.
    pub fn reconstruct_new_content(&self) -> RebuiltContent {
        let mut rebuilt = RebuiltContent::default();
        let mut line_no: u32 = 0;
        for line in self.diff_lines() {
            match line.kind {
                DiffLineKind::Removed => {
                    if carries_content(line.text) {
                        rebuilt.removals.insert(line_no + 1);
                    }
                    continue;
                }
                DiffLineKind::Added => {
                    rebuilt.added.insert(line_no + 1);
                }
                DiffLineKind::Context => {}
            }
            line_no += 1;
            rebuilt.text.push_str(line.text);
            rebuilt.text.push('\n');
        }
        rebuilt
    }
}

fn parse_new_start(header: &str) -> Option<u32> {
    // @@ -a,b +c,d @@ optional section
    let plus = header.split_whitespace().find(|t| t.starts_with('+'))?;
    let mut parts = plus.trim_start_matches('+').split(',');
    let start: u32 = parts.next()?.parse().ok()?;
    // A zero-length new side names the line the hunk follows.
    match parts.next().map(str::parse::<u32>) {
        Some(Ok(0)) => Some(start + 1),
        _ => Some(start),
    }
}

fn is_file_header(raw: &str, has_hunks: bool) -> bool {
    if has_hunks {
        return false;
    }
    raw.starts_with("+++ ")
        || raw.starts_with("--- ")
        || raw.starts_with("diff --git")
        || raw.starts_with("index ")
}

/// Everything the engine knows about one merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrContext {
    pub project_id: u64,
    /// Project the source branch lives in, when it differs (cross-fork MRs).
    #[serde(default)]
    pub source_project_id: Option<u64>,
    pub mr_iid: u64,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub changes: Vec<FileChange>,
}

fn default_target_branch() -> String {
    "main".to_string()
}

impl MrContext {
    /// Minimal context targeting `main`.
    pub fn new(project_id: u64, mr_iid: u64) -> Self {
        Self {
            project_id,
            source_project_id: None,
            mr_iid,
            source_branch: String::new(),
            target_branch: default_target_branch(),
            author: String::new(),
            title: String::new(),
            changes: Vec::new(),
        }
    }

    pub fn with_branches(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_branch = source.into();
        self.target_branch = target.into();
        self
    }

    pub fn with_source_project(mut self, project_id: u64) -> Self {
        self.source_project_id = Some(project_id);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_change(mut self, change: FileChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Project holding the source branch.
    pub fn source_project(&self) -> u64 {
        self.source_project_id.unwrap_or(self.project_id)
    }

    /// Every change except the one at `path`.
    pub fn other_changes<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FileChange> {
        self.changes.iter().filter(move |c| c.path() != path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_file_diff_numbers_every_line() {
        let change = FileChange::added("a.yaml", "kind: Tag\nname: x_y\n");
        assert!(change.new_file);
        assert_eq!(change.added_lines(), vec!["kind: Tag", "name: x_y"]);
        assert_eq!(
            change.added_line_numbers().into_iter().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_hunk_header_sets_new_line_numbers() {
        let diff = "@@ -10,3 +12,4 @@ name: analytics\n context\n-old\n+new\n+newer\n tail\n";
        let change = FileChange::modified("p.yaml", diff);
        let added: Vec<u32> = change.added_line_numbers().into_iter().collect();
        assert_eq!(added, vec![13, 14]);
        assert_eq!(change.removed_lines(), vec!["old"]);
    }

    #[test]
    fn test_file_headers_are_skipped_before_first_hunk() {
        let diff = "--- a/x.yaml\n+++ b/x.yaml\n@@ -1 +1 @@\n-a: 1\n+a: 2\n";
        let change = FileChange::modified("x.yaml", diff);
        assert_eq!(change.added_lines(), vec!["a: 2"]);
        assert_eq!(change.removed_lines(), vec!["a: 1"]);
    }

    #[test]
    fn test_headerless_diff_reads_as_single_hunk() {
        let change = FileChange::modified("x.yaml", "+a: 1\n+b: 2\n");
        let added: Vec<u32> = change.added_line_numbers().into_iter().collect();
        assert_eq!(added, vec![1, 2]);
    }

    #[test]
    fn test_reconstruct_new_content_skips_removed_lines() {
        let diff = "@@ -1,3 +1,3 @@\n keep\n-gone\n+here\n end\n";
        let change = FileChange::modified("x.yaml", diff);
        let rebuilt = change.reconstruct_new_content();
        assert_eq!(rebuilt.text, "keep\nhere\nend\n");
        assert_eq!(rebuilt.added.into_iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(rebuilt.removals.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_empty_diff() {
        let change = FileChange::modified("x.yaml", "  \n");
        assert!(change.is_empty_diff());
        assert!(change.diff_lines().is_empty());
        assert!(change.removal_positions().is_empty());
        assert_eq!(change.reconstruct_new_content(), RebuiltContent::default());
    }

    #[test]
    fn test_removal_positions() {
        let diff = "@@ -1,4 +1,2 @@\n name: a\n-owner: b\n-\n-# note\n tags: {}\n";
        let change = FileChange::modified("p.yaml", diff);
        assert_eq!(change.removal_positions().into_iter().collect::<Vec<_>>(), vec![2]);

        // Pure deletion hunk: "+1,0" follows line 1.
        let change = FileChange::modified("p.yaml", "@@ -2,1 +1,0 @@\n-owner: b\n");
        assert_eq!(change.removal_positions().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_deleted_change_removes_everything() {
        let change = FileChange::deleted("x.yaml", "a: 1\nb: 2\n");
        assert!(change.deleted_file);
        assert!(change.added_lines().is_empty());
        assert_eq!(change.removed_lines().len(), 2);
    }

    #[test]
    fn test_source_project_defaults_to_target_project() {
        let ctx = MrContext::new(7, 1);
        assert_eq!(ctx.source_project(), 7);
        let fork = MrContext::new(7, 1).with_source_project(99);
        assert_eq!(fork.source_project(), 99);
    }

    #[test]
    fn test_other_changes_excludes_own_path() {
        let ctx = MrContext::new(1, 1)
            .with_change(FileChange::added("a.yaml", "a: 1"))
            .with_change(FileChange::added("b.yaml", "b: 1"));
        let others: Vec<&str> = ctx.other_changes("a.yaml").map(|c| c.path()).collect();
        assert_eq!(others, vec!["b.yaml"]);
    }

    #[test]
    fn test_mr_context_deserializes_with_defaults() {
        let json = r#"{"project_id": 3, "mr_iid": 42, "changes": [
            {"old_path": "a.yaml", "new_path": "a.yaml", "diff": "+a: 1\n"}
        ]}"#;
        let ctx: MrContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.target_branch, "main");
        assert_eq!(ctx.changes.len(), 1);
        assert!(!ctx.changes[0].new_file);
    }
}
