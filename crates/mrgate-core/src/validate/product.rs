//! `product.yaml` document shapes.
//!
//! Every field is optional: product files carry many keys these rules do not
//! govern, and a partially written product must still be inspectable.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::opt_text;

pub const CONSUMER_KIND_DATA_PRODUCT: &str = "data_product";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseEntry {
    #[serde(default, rename = "type")]
    pub warehouse_type: Option<Value>,
    #[serde(default)]
    pub size: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductTags {
    #[serde(default, rename = "dataProduct", alias = "data_product")]
    pub data_product: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub kind: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresentationSchema {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub consumers: Vec<Consumer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductDatabase {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub presentation_schemas: Vec<PresentationSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductDocument {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default, alias = "roverGroup")]
    pub rover_group: Option<Value>,
    #[serde(default)]
    pub warehouses: Vec<WarehouseEntry>,
    #[serde(default)]
    pub tags: Option<ProductTags>,
    #[serde(default)]
    pub data_product_db: Vec<ProductDatabase>,
}

impl ProductDocument {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value.clone()).map_err(|e| e.to_string())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        Self::from_value(&value)
    }

    pub fn name(&self) -> Option<String> {
        opt_text(&self.name)
    }

    /// Every consumer across all databases and presentation schemas.
    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.data_product_db
            .iter()
            .flat_map(|db| db.presentation_schemas.iter())
            .flat_map(|schema| schema.consumers.iter())
    }

    /// Warehouse `(type, size)` pairs with both parts present, in file order.
    pub fn warehouse_sizes(&self) -> Vec<(String, String)> {
        self.warehouses
            .iter()
            .filter_map(|w| Some((opt_text(&w.warehouse_type)?, opt_text(&w.size)?)))
            .collect()
    }
}

impl Consumer {
    pub fn name(&self) -> Option<String> {
        opt_text(&self.name)
    }

    pub fn kind(&self) -> Option<String> {
        opt_text(&self.kind)
    }

    pub fn is_data_product(&self) -> bool {
        self.kind()
            .is_some_and(|k| k.eq_ignore_ascii_case(CONSUMER_KIND_DATA_PRODUCT))
    }
}
