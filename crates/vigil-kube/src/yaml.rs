//! YAML documents as `serde_json::Value`
//!
//! Manifests and config files are parsed with yaml-rust2 and converted so the
//! rest of the crate only deals with JSON values.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// A document could not be parsed or converted
#[derive(Debug, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Parse every document in `input`, skipping empty ones
///
/// A leading `{` is treated as a single JSON document.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    if input.trim_start().starts_with('{') {
        return serde_json::from_str(input)
            .map(|value| vec![value])
            .map_err(|e| YamlError(format!("invalid JSON: {}", e)));
    }

    YamlLoader::load_from_str(input)
        .map_err(|e| YamlError(e.to_string()))?
        .into_iter()
        .filter(|doc| !matches!(doc, Yaml::Null))
        .map(to_json)
        .collect()
}

fn to_json(yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        Yaml::Real(raw) => {
            let f: f64 = raw
                .parse()
                .map_err(|_| YamlError(format!("invalid float {:?}", raw)))?;
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(key_string(key)?, to_json(value)?);
            }
            Value::Object(map)
        }
        // The loader substitutes anchored nodes for aliases; what is left is unresolvable.
        Yaml::Alias(_) | Yaml::BadValue => return Err(YamlError("unresolved YAML value".into())),
    })
}

fn key_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        other => Err(YamlError(format!("unsupported mapping key {:?}", other))),
    }
}
