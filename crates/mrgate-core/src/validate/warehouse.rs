//! Warehouse size vocabulary and target/source diffing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::product::ProductDocument;
use crate::section::{significant_lines, strip_block, strip_nested_blocks};

/// Canonical sizes, smallest first.
pub const WAREHOUSE_SIZES: &[&str] = &[
    "XSMALL", "SMALL", "MEDIUM", "LARGE", "XLARGE", "X2LARGE", "X3LARGE", "X4LARGE", "X5LARGE",
    "X6LARGE",
];

/// Map a size spelling onto the canonical table.
///
/// Accepts case and separator variants (`x-small`, `X_LARGE`) as well as the
/// `XXLARGE` / `2XLARGE` / `X2LARGE` family.
pub fn normalize_size(raw: &str) -> Option<&'static str> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect::<String>()
        .to_uppercase();

    let canonical = match compact.as_str() {
        "XS" => "XSMALL",
        "S" => "SMALL",
        "M" => "MEDIUM",
        "L" => "LARGE",
        "XL" => "XLARGE",
        other => {
            let multiplier = other
                .strip_suffix("XLARGE")
                .and_then(|prefix| match prefix {
                    "" => Some(1),
                    p if p.chars().all(|c| c == 'X') => Some(p.len() + 1),
                    p => p.parse::<usize>().ok(),
                })
                .or_else(|| {
                    other
                        .strip_prefix('X')
                        .and_then(|r| r.strip_suffix("LARGE"))
                        .and_then(|n| n.parse::<usize>().ok())
                });
            return match multiplier {
                Some(1) => Some("XLARGE"),
                Some(n @ 2..=6) => WAREHOUSE_SIZES.get(n + 3).copied(),
                Some(_) => None,
                None => WAREHOUSE_SIZES.iter().find(|s| **s == other).copied(),
            };
        }
    };
    Some(canonical)
}

/// Position in [`WAREHOUSE_SIZES`]; `None` for unrecognised sizes.
pub fn size_rank(raw: &str) -> Option<usize> {
    let canonical = normalize_size(raw)?;
    WAREHOUSE_SIZES.iter().position(|s| *s == canonical)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseChangeKind {
    Addition,
    Removal,
    Increase,
    Decrease,
}

impl fmt::Display for WarehouseChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarehouseChangeKind::Addition => "addition",
            WarehouseChangeKind::Removal => "removal",
            WarehouseChangeKind::Increase => "increase",
            WarehouseChangeKind::Decrease => "decrease",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseChange {
    pub warehouse_type: String,
    pub kind: WarehouseChangeKind,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl fmt::Display for WarehouseChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.as_deref().unwrap_or("none");
        let to = self.to.as_deref().unwrap_or("none");
        write!(f, "{} ({} -> {})", self.warehouse_type, from, to)
    }
}

/// Result of comparing a product file between target and source branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseDiff {
    pub changes: Vec<WarehouseChange>,
    /// Something outside the `warehouses:` block differs as well.
    pub non_warehouse_changes: bool,
    /// Something outside both the `warehouses:` and the `consumers:` blocks
    /// differs.
    #[serde(default)]
    pub ungoverned_changes: bool,
}

impl WarehouseDiff {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn only(&self, kinds: &[WarehouseChangeKind]) -> bool {
        self.changes.iter().all(|c| kinds.contains(&c.kind))
    }

    /// Review message whose headline depends on which kinds of change occur.
    pub fn message(&self) -> Option<String> {
        use WarehouseChangeKind::*;
        if self.changes.is_empty() {
            return None;
        }
        let plain = |changes: &[WarehouseChange]| {
            changes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let message = if self.only(&[Removal]) {
            format!("Warehouse removal detected: {}", plain(&self.changes))
        } else if self.only(&[Decrease]) {
            format!("Warehouse size decrease detected: {}", plain(&self.changes))
        } else if self.only(&[Addition]) || self.only(&[Increase]) {
            format!("Warehouse size increase detected: {}", plain(&self.changes))
        } else {
            let annotated = self
                .changes
                .iter()
                .map(|c| format!("{c} [{}]", c.kind))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Warehouse changes detected - manual review required: {annotated}")
        };
        Some(message)
    }
}

fn size_map(doc: &ProductDocument) -> BTreeMap<String, String> {
    doc.warehouse_sizes().into_iter().collect()
}

fn significant_text(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    significant_lines(content)
        .into_iter()
        .map(|n| lines[n as usize - 1].trim_end().to_string())
        .collect()
}

fn without_warehouses(content: &str) -> Vec<String> {
    significant_text(&strip_block(content, "warehouses"))
}

fn without_governed_blocks(content: &str) -> Vec<String> {
    significant_text(&strip_nested_blocks(
        &strip_block(content, "warehouses"),
        "consumers",
    ))
}

/// Compare the target-branch and source-branch text of one product file.
///
/// Empty text on either side stands for an absent file.
pub fn diff_warehouses(target: &str, source: &str) -> Result<WarehouseDiff, String> {
    let before = size_map(&ProductDocument::from_yaml_str(target)?);
    let after = size_map(&ProductDocument::from_yaml_str(source)?);

    let mut changes = Vec::new();
    for (warehouse_type, old) in &before {
        match after.get(warehouse_type) {
            None => changes.push(WarehouseChange {
                warehouse_type: warehouse_type.clone(),
                kind: WarehouseChangeKind::Removal,
                from: Some(old.clone()),
                to: None,
            }),
            Some(new) => {
                let (Some(a), Some(b)) = (size_rank(old), size_rank(new)) else {
                    continue;
                };
                let kind = match b.cmp(&a) {
                    std::cmp::Ordering::Greater => WarehouseChangeKind::Increase,
                    std::cmp::Ordering::Less => WarehouseChangeKind::Decrease,
                    std::cmp::Ordering::Equal => continue,
                };
                changes.push(WarehouseChange {
                    warehouse_type: warehouse_type.clone(),
                    kind,
                    from: Some(old.clone()),
                    to: Some(new.clone()),
                });
            }
        }
    }
    for (warehouse_type, new) in &after {
        if !before.contains_key(warehouse_type) {
            changes.push(WarehouseChange {
                warehouse_type: warehouse_type.clone(),
                kind: WarehouseChangeKind::Addition,
                from: None,
                to: Some(new.clone()),
            });
        }
    }
    changes.sort_by(|a, b| a.warehouse_type.cmp(&b.warehouse_type));

    Ok(WarehouseDiff {
        changes,
        non_warehouse_changes: without_warehouses(target) != without_warehouses(source),
        ungoverned_changes: without_governed_blocks(target) != without_governed_blocks(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(sizes: &[(&str, &str)]) -> String {
        let mut out = String::from("name: analytics\nwarehouses:\n");
        for (t, s) in sizes {
            out.push_str(&format!("  - type: {t}\n    size: {s}\n"));
        }
        out
    }

    #[test]
    fn test_size_normalisation() {
        assert_eq!(normalize_size("xsmall"), Some("XSMALL"));
        assert_eq!(normalize_size("X-Small"), Some("XSMALL"));
        assert_eq!(normalize_size("XXLARGE"), Some("X2LARGE"));
        assert_eq!(normalize_size("2X-LARGE"), Some("X2LARGE"));
        assert_eq!(normalize_size("X6LARGE"), Some("X6LARGE"));
        assert_eq!(normalize_size("X-LARGE"), Some("XLARGE"));
        assert_eq!(normalize_size("X7LARGE"), None);
        assert_eq!(normalize_size("HUGE"), None);
    }

    #[test]
    fn test_rank_is_a_total_order_not_lexical() {
        assert!(size_rank("SMALL") > size_rank("XSMALL"));
        assert!(size_rank("MEDIUM") < size_rank("LARGE"));
        assert!(size_rank("X2LARGE") > size_rank("XLARGE"));
        assert!(size_rank("X10LARGE").is_none());
    }

    #[test]
    fn test_increase() {
        let diff = diff_warehouses(&product(&[("user", "XSMALL")]), &product(&[("user", "SMALL")]))
            .unwrap();
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].kind, WarehouseChangeKind::Increase);
        assert!(!diff.non_warehouse_changes);
        assert_eq!(
            diff.message().unwrap(),
            "Warehouse size increase detected: user (XSMALL -> SMALL)"
        );
    }

    #[test]
    fn test_pure_removal_and_decrease_messages() {
        let removal =
            diff_warehouses(&product(&[("user", "SMALL")]), &product(&[])).unwrap();
        assert!(removal.message().unwrap().starts_with("Warehouse removal detected"));

        let decrease = diff_warehouses(&product(&[("user", "LARGE")]), &product(&[("user", "SMALL")]))
            .unwrap();
        assert!(decrease.message().unwrap().starts_with("Warehouse size decrease detected"));
    }

    #[test]
    fn test_new_file_is_addition() {
        let diff = diff_warehouses("", &product(&[("user", "XSMALL")])).unwrap();
        assert_eq!(diff.changes[0].kind, WarehouseChangeKind::Addition);
        assert!(diff.message().unwrap().starts_with("Warehouse size increase detected"));
        assert!(diff.non_warehouse_changes);
    }

    #[test]
    fn test_mixed_changes_are_annotated() {
        let diff = diff_warehouses(
            &product(&[("user", "SMALL"), ("service", "LARGE")]),
            &product(&[("user", "MEDIUM"), ("service", "SMALL")]),
        )
        .unwrap();
        let msg = diff.message().unwrap();
        assert!(msg.starts_with("Warehouse changes detected - manual review required:"));
        assert!(msg.contains("service (LARGE -> SMALL) [decrease]"));
        assert!(msg.contains("user (SMALL -> MEDIUM) [increase]"));
    }

    #[test]
    fn test_unrecognised_and_equivalent_sizes_are_not_changes() {
        let diff = diff_warehouses(&product(&[("user", "HUGE")]), &product(&[("user", "SMALL")]))
            .unwrap();
        assert!(!diff.has_changes());
        let diff = diff_warehouses(&product(&[("user", "XXLARGE")]), &product(&[("user", "X2LARGE")]))
            .unwrap();
        assert!(!diff.has_changes());
        assert!(diff.message().is_none());
    }

    #[test]
    fn test_non_warehouse_changes_are_flagged() {
        let target = product(&[("user", "SMALL")]);
        let source = target.replace("name: analytics", "name: analytics2");
        let diff = diff_warehouses(&target, &source).unwrap();
        assert!(!diff.has_changes());
        assert!(diff.non_warehouse_changes);
        assert!(diff.ungoverned_changes);
    }

    #[test]
    fn test_consumer_edits_are_not_ungoverned() {
        let target = format!(
            "{}data_product_db:\n  - name: db\n    consumers:\n      - name: finance\n        kind: data_product\n",
            product(&[("user", "SMALL")])
        );
        let source = target.replace("finance", "marketing");
        let diff = diff_warehouses(&target, &source).unwrap();
        assert!(diff.non_warehouse_changes);
        assert!(!diff.ungoverned_changes);

        let dropped = target.replace("name: analytics\n", "");
        assert!(diff_warehouses(&target, &dropped).unwrap().ungoverned_changes);
    }
}
