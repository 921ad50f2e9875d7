//! Repository path conventions.
//!
//! Data-product files live under `dataproducts/<type>/<dp>/<env>/...`;
//! service accounts under `serviceaccounts/<env>/<name>.yaml`.

/// Product type directories a data product can live in.
pub const PRODUCT_TYPES: &[&str] = &["source", "aggregate", "platform"];

/// Environments recognised for messaging even when not in an allow-list.
pub const KNOWN_ENVIRONMENTS: &[&str] = &["dev", "sandbox", "platformtest", "preprod", "prod"];

/// Segments of a `dataproducts/<type>/<dp>/<env>/...` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataProductPath {
    pub product_type: String,
    pub data_product: String,
    /// Only set when a further segment follows it (i.e. not the file name).
    pub environment: Option<String>,
}

impl DataProductPath {
    /// Parse a repository path; `None` when it is not below `dataproducts/<type>/<dp>/`.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let root = segments.iter().position(|s| *s == "dataproducts")?;
        let rest = &segments[root + 1..];
        if rest.len() < 3 {
            return None;
        }
        let environment = if rest.len() >= 4 {
            Some(rest[2].to_string())
        } else {
            None
        };
        Some(Self {
            product_type: rest[0].to_string(),
            data_product: rest[1].to_string(),
            environment,
        })
    }

    /// Environment segment, if it names a known environment.
    pub fn known_environment(&self) -> Option<&str> {
        self.environment
            .as_deref()
            .filter(|env| KNOWN_ENVIRONMENTS.contains(env))
    }
}

/// Base name of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether the path names a YAML file.
pub fn is_yaml(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// First path segment that matches one of `environments`.
pub fn environment_segment<'a>(path: &'a str, environments: &[String]) -> Option<&'a str> {
    path.split('/')
        .find(|seg| environments.iter().any(|env| env == seg))
}
