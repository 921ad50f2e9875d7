//! Reference lookups shared by the existence checks.
//!
//! Existence checks first look at what the merge request itself adds, so a
//! policy and the group it grants access to can land together, and only then
//! ask the repository.

use mrgate_repo::{FileChange, MrContext, RepositoryReader};
use tracing::warn;

use crate::domain::path::file_name;

/// Value of a `key: value` line, unquoted and without trailing comment.
pub(crate) fn yaml_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let t = line.trim_start().trim_start_matches("- ").trim_start();
    let rest = t.strip_prefix(key)?.strip_prefix(':')?;
    let value = rest.split(" #").next().unwrap_or(rest).trim();
    Some(value.trim_matches(|c| c == '"' || c == '\''))
}

/// Whether `change` adds a document declaring `kind: <kind>` (case-insensitive)
/// and `name: <name>`.
pub fn declares(change: &FileChange, kind: &str, name: &str) -> bool {
    if change.deleted_file {
        return false;
    }
    let added = change.added_lines();
    let has_kind = added
        .iter()
        .any(|l| yaml_value(l, "kind").is_some_and(|k| k.eq_ignore_ascii_case(kind)));
    has_kind && added.iter().any(|l| yaml_value(l, "name") == Some(name))
}

/// Whether another file of the MR creates `<dir>/.../<name>.yaml` below a
/// segment called `dir`, or declares the name with a matching kind.
pub fn added_in_mr(ctx: &MrContext, current: &str, dir: &str, kind: &str, name: &str) -> bool {
    ctx.other_changes(current).any(|change| {
        if change.deleted_file {
            return false;
        }
        let path = change.path();
        let base = file_name(path);
        let named = base == format!("{name}.yaml") || base == format!("{name}.yml");
        let under_dir = path.split('/').any(|seg| seg == dir);
        (named && under_dir) || declares(change, kind, name)
    })
}

/// Whether any line of `content` reads `key: value`.
pub fn text_declares(content: &str, key: &str, value: &str) -> bool {
    content.lines().any(|l| yaml_value(l, key) == Some(value))
}

/// Whether another file of the MR adds a masking policy called `policy`.
pub fn masking_policy_added_in_mr(ctx: &MrContext, current: &str, policy: &str) -> bool {
    ctx.other_changes(current)
        .any(|change| declares(change, "MaskingPolicy", policy))
}

/// Outcome of asking the repository for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found,
    Missing,
    /// The lookup itself failed; callers skip the check.
    Unavailable,
}

/// Look `path` up at `reference`.
pub async fn lookup(
    repo: &dyn RepositoryReader,
    project_id: u64,
    path: &str,
    reference: &str,
) -> Lookup {
    match repo.get_file(project_id, path, reference).await {
        Ok(_) => Lookup::Found,
        Err(e) if e.is_not_found() => Lookup::Missing,
        Err(e) => {
            warn!(project_id, path, reference, error = %e, "reference lookup failed");
            Lookup::Unavailable
        }
    }
}
