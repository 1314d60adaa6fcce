//! Catalog records: loading the raw input file and normalizing each
//! loosely-typed entry into an [`Item`].
//!
//! Field aliases accepted on input:
//! - `uid` | `item_id` (strings or numbers)
//! - `name` | `title`
//! - `price` | `price_usd` (numbers or strings like `"$1,299.00"`)
//! - `available_size` | `sizes` (comma separated string or array)

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{PipelineError, PipelineResult};

/// Size token meaning "not applicable"; dropped from size lists.
const SIZE_NOT_APPLICABLE: &str = "N/A";

/// Characters stripped from price strings before parsing.
const PRICE_NOISE: &[char] = &['$', '€', '£', '¥', ','];

/// Canonical catalog entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub uid: String,
    pub name: String,
    pub brand: String,
    #[serde(rename = "price_value")]
    pub price: f64,
    pub discount: f64,
    #[serde(rename = "available_size")]
    pub available_sizes: Vec<String>,
    pub image_url: String,
}

impl Item {
    /// Text sent to the text encoder: name, then brand, then uid.
    pub fn embedding_text(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.brand.is_empty() {
            &self.brand
        } else {
            &self.uid
        }
    }
}

/// Outcome of normalizing a whole input file.
#[derive(Debug, Default)]
pub struct Normalized {
    pub items: Vec<Item>,
    pub rejected: usize,
}

/// Read the input file and return its raw records.
///
/// The file must contain a JSON array; anything else is fatal.
pub fn load_records(path: &Path) -> PipelineResult<Vec<Value>> {
    let raw = std::fs::read(path)?;
    match serde_json::from_slice(&raw)? {
        Value::Array(records) => Ok(records),
        other => Err(PipelineError::Input(format!(
            "expected {} to contain a list, found {}",
            path.display(),
            json_kind(&other)
        ))),
    }
}

/// Normalize every record, skipping and logging the ones that fail.
pub fn normalize_all(records: &[Value]) -> Normalized {
    let mut out = Normalized::default();
    for (index, record) in records.iter().enumerate() {
        match normalize_record(index, record) {
            Ok(item) => out.items.push(item),
            Err(err) => {
                log::warn!("skipping invalid item: {err}");
                out.rejected += 1;
            }
        }
    }
    out
}

/// Parse one raw record into an [`Item`].
pub fn normalize_record(index: usize, record: &Value) -> PipelineResult<Item> {
    let fields = record.as_object().ok_or_else(|| {
        PipelineError::invalid_record(index, format!("expected object, found {}", json_kind(record)))
    })?;

    let uid = first_string(fields, &["uid", "item_id"]);
    if uid.is_empty() {
        return Err(PipelineError::invalid_record(index, "item uid is required"));
    }

    let price = first_present(fields, &["price", "price_usd"])
        .map(parse_price)
        .unwrap_or(0.0);
    let discount = fields.get("discount").map(parse_decimal).unwrap_or(0.0);
    let available_sizes = first_present(fields, &["available_size", "sizes"])
        .map(parse_sizes)
        .unwrap_or_default();

    Ok(Item {
        uid,
        name: first_string(fields, &["name", "title"]),
        brand: first_string(fields, &["brand"]),
        price,
        discount,
        available_sizes,
        image_url: first_string(fields, &["image_url"]),
    })
}

/// First alias holding a non-empty value. Nulls, `false`, zero, blank
/// strings and empty arrays or objects fall through to the next alias.
fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64() != Some(0.0),
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(values) => !values.is_empty(),
            Value::Object(map) => !map.is_empty(),
        })
}

fn first_string(fields: &Map<String, Value>, keys: &[&str]) -> String {
    first_present(fields, keys)
        .and_then(scalar_to_string)
        .unwrap_or_default()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Strip currency symbols and thousands separators, then parse.
/// Anything unparsable, negative or non-finite becomes 0.0.
pub fn parse_price(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .replace(PRICE_NOISE, "")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    match parsed {
        Some(price) if price.is_finite() && price >= 0.0 => price,
        _ => 0.0,
    }
}

fn parse_decimal(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|d| d.is_finite()).unwrap_or(0.0)
}

/// Split sizes on commas, trim, drop empties and the N/A sentinel.
pub fn parse_sizes(value: &Value) -> Vec<String> {
    let tokens: Vec<String> = match value {
        Value::Array(values) => values.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    };
    tokens
        .iter()
        .flat_map(|token| token.split(','))
        .map(str::trim)
        .filter(|size| !size.is_empty() && !size.eq_ignore_ascii_case(SIZE_NOT_APPLICABLE))
        .map(str::to_string)
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
