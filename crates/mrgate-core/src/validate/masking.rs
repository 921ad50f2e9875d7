//! Masking policy validation.
//!
//! Checks run independently and every violation is recorded, except that
//! missing required fields stop validation of the document early.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::{opt_text, ValidationResult};
use crate::domain::path::DataProductPath;

/// `<dp>_<classification>_<datatype>_policy`
pub static POLICY_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]{3,30})_(pii|restricted|restrictedpii)_(string|float|number)_policy$")
        .expect("policy name pattern")
});

static FLOAT_MASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").expect("float mask pattern"));

static NUMBER_MASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("number mask pattern"));

pub static CONSUMER_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^dataverse-(source|aggregate|consumer)-[a-z0-9]{3,30}(-[a-z0-9][a-z0-9_-]*)?$")
        .expect("consumer group pattern")
});

pub static SERVICE_ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]{3,30}_[a-z0-9]+_[a-z0-9]+_appuser$").expect("service account pattern")
});

pub const STRATEGY_UNMASKED: &str = "UNMASKED";
pub const STRATEGY_HASH_SHA1: &str = "HASH_SHA1";
pub const KIND_CONSUMER_GROUP: &str = "consumer_group";
pub const KIND_SERVICE_ACCOUNT: &str = "service_account";

const DATA_TYPES: &[&str] = &["string", "float", "number"];

/// A consumer reference inside a masking case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRef {
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
}

/// One `cases[]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskingCase {
    #[serde(default)]
    pub strategy: Option<Value>,
    #[serde(default)]
    pub consumers: Option<Vec<ConsumerRef>>,
}

/// Parsed `MaskingPolicy` document. Scalars stay loosely typed so a wrong
/// scalar type is reported as a field error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskingPolicyDocument {
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default, alias = "dataProduct")]
    pub data_product: Option<Value>,
    #[serde(default, alias = "dataType", alias = "data_type")]
    pub datatype: Option<Value>,
    #[serde(default)]
    pub mask: Option<Value>,
    #[serde(default)]
    pub cases: Option<Vec<MaskingCase>>,
}

impl MaskingPolicyDocument {
    /// Typed view of a parsed YAML value; `Null` yields an empty document.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value.clone()).map_err(|e| e.to_string())
    }

    pub fn name(&self) -> Option<String> {
        opt_text(&self.name)
    }

    pub fn data_product(&self) -> Option<String> {
        opt_text(&self.data_product)
    }

    /// Every `(kind, name)` consumer pair with both parts present.
    pub fn consumers(&self) -> Vec<(String, String)> {
        self.cases
            .iter()
            .flatten()
            .flat_map(|c| c.consumers.iter().flatten())
            .filter_map(|c| Some((opt_text(&c.kind)?, opt_text(&c.name)?)))
            .collect()
    }
}

struct CheckedCase {
    strategy: String,
    consumers: Vec<(String, String)>,
}

struct Required {
    kind: String,
    name: String,
    data_product: String,
    datatype: String,
    mask: String,
    cases: Vec<CheckedCase>,
}

fn check_required(doc: &MaskingPolicyDocument, result: &mut ValidationResult) -> Option<Required> {
    let mut field = |value: &Option<Value>, name: &str| {
        let text = opt_text(value);
        if text.is_none() {
            result.add_error(name, "is required");
        }
        text
    };
    let kind = field(&doc.kind, "kind");
    let name = field(&doc.name, "name");
    let data_product = field(&doc.data_product, "data_product");
    let datatype = field(&doc.datatype, "datatype");
    let mask = field(&doc.mask, "mask");

    let mut cases = Vec::new();
    let mut complete = true;
    match doc.cases.as_deref() {
        None | Some([]) => {
            result.add_error("cases", "at least one case is required");
            complete = false;
        }
        Some(raw_cases) => {
            for (i, case) in raw_cases.iter().enumerate() {
                let strategy = opt_text(&case.strategy);
                if strategy.is_none() {
                    result.add_error(format!("cases[{i}].strategy"), "is required");
                }
                let mut consumers = Vec::new();
                match case.consumers.as_deref() {
                    None | Some([]) => {
                        result.add_error(
                            format!("cases[{i}].consumers"),
                            "at least one consumer is required",
                        );
                        complete = false;
                    }
                    Some(raw) => {
                        for (j, consumer) in raw.iter().enumerate() {
                            let kind = opt_text(&consumer.kind);
                            let cname = opt_text(&consumer.name);
                            if kind.is_none() {
                                result.add_error(format!("cases[{i}].consumers[{j}].kind"), "is required");
                            }
                            if cname.is_none() {
                                result.add_error(format!("cases[{i}].consumers[{j}].name"), "is required");
                            }
                            match (kind, cname) {
                                (Some(k), Some(n)) => consumers.push((k, n)),
                                _ => complete = false,
                            }
                        }
                    }
                }
                match strategy {
                    Some(strategy) if complete => cases.push(CheckedCase {
                        strategy,
                        consumers,
                    }),
                    _ => complete = false,
                }
            }
        }
    }

    if !complete {
        return None;
    }
    Some(Required {
        kind: kind?,
        name: name?,
        data_product: data_product?,
        datatype: datatype?,
        mask: mask?,
        cases,
    })
}

/// Validate a masking policy located at `file_path`.
pub fn validate_masking_policy(doc: &MaskingPolicyDocument, file_path: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(req) = check_required(doc, &mut result) else {
        return result;
    };

    if !req.kind.eq_ignore_ascii_case("MaskingPolicy") {
        result.add_error("kind", format!("must be 'MaskingPolicy', got '{}'", req.kind));
    }

    let datatype = req.datatype.to_lowercase();
    if !DATA_TYPES.contains(&datatype.as_str()) {
        result.add_error(
            "datatype",
            format!("'{}' must be one of string, float, number", req.datatype),
        );
    }

    match POLICY_NAME_RE.captures(&req.name) {
        None => result.add_error(
            "name",
            format!(
                "'{}' must match <dataproduct>_<pii|restricted|restrictedpii>_<string|float|number>_policy",
                req.name
            ),
        ),
        Some(caps) => {
            let prefix = &caps[1];
            let token = &caps[3];
            if token != datatype {
                result.add_error(
                    "name",
                    format!("datatype '{token}' in name does not match datatype '{}'", req.datatype),
                );
            }
            if !prefix.eq_ignore_ascii_case(&req.data_product) {
                result.add_error(
                    "name",
                    format!("must be prefixed with '{}_'", req.data_product.to_lowercase()),
                );
            }
        }
    }

    let location = DataProductPath::parse(file_path);
    if let Some(loc) = &location {
        if !req.data_product.eq_ignore_ascii_case(&loc.data_product) {
            result.add_error(
                "data_product",
                format!(
                    "'{}' does not match data product '{}' in path",
                    req.data_product, loc.data_product
                ),
            );
        }
    }

    match datatype.as_str() {
        "string" if req.mask.is_empty() => result.add_error("mask", "must not be empty"),
        "float" if !FLOAT_MASK_RE.is_match(&req.mask) => result.add_error(
            "mask",
            format!("'{}' is not a valid float mask", req.mask),
        ),
        "number" if !NUMBER_MASK_RE.is_match(&req.mask) => result.add_error(
            "mask",
            format!("'{}' is not a valid number mask", req.mask),
        ),
        _ => {}
    }

    let environment = location
        .as_ref()
        .and_then(|l| l.known_environment())
        .map(str::to_string);
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut last_unmasked = None;
    let mut first_hash = None;

    for (i, case) in req.cases.iter().enumerate() {
        let strategy = case.strategy.to_uppercase();
        match strategy.as_str() {
            STRATEGY_UNMASKED => last_unmasked = Some(i),
            STRATEGY_HASH_SHA1 => {
                first_hash.get_or_insert(i);
                if datatype != "string" {
                    result.add_error(
                        format!("cases[{i}].strategy"),
                        format!("HASH_SHA1 is only valid for string datatype, not '{datatype}'"),
                    );
                }
            }
            _ => result.add_error(
                format!("cases[{i}].strategy"),
                format!("'{}' must be UNMASKED or HASH_SHA1", case.strategy),
            ),
        }

        for (j, (kind, name)) in case.consumers.iter().enumerate() {
            let field = format!("cases[{i}].consumers[{j}]");
            check_consumer(&mut result, &field, kind, name, environment.as_deref());
            if let Some(prev) = seen.insert((kind.to_lowercase(), name.clone()), i) {
                result.add_error(
                    field,
                    format!("duplicate consumer {kind} '{name}' (already listed in cases[{prev}])"),
                );
            }
        }
    }

    if datatype == "string" {
        if let (Some(u), Some(h)) = (last_unmasked, first_hash) {
            if h < u {
                result.add_error(
                    "cases",
                    format!("UNMASKED case (index {u}) must come before HASH_SHA1 case (index {h})"),
                );
            }
        }
    }

    result
}

fn check_consumer(
    result: &mut ValidationResult,
    field: &str,
    kind: &str,
    name: &str,
    environment: Option<&str>,
) {
    match kind.to_lowercase().as_str() {
        KIND_CONSUMER_GROUP => {
            if !CONSUMER_GROUP_RE.is_match(name) {
                result.add_error(
                    format!("{field}.name"),
                    format!("'{name}' must match dataverse-<source|aggregate|consumer>-<dp>[-<suffix>]"),
                );
            }
        }
        KIND_SERVICE_ACCOUNT => {
            if !SERVICE_ACCOUNT_RE.is_match(name) {
                result.add_error(
                    format!("{field}.name"),
                    format!("'{name}' must match <dp>_<tool>_<env>_appuser"),
                );
            } else if let Some(env) = environment {
                if !name.ends_with(&format!("_{env}_appuser")) {
                    result.add_error(
                        format!("{field}.name"),
                        format!("'{name}' must end with _{env}_appuser for the {env} environment"),
                    );
                }
            }
        }
        _ => result.add_error(
            format!("{field}.kind"),
            format!("'{kind}' must be consumer_group or service_account"),
        ),
    }
}
