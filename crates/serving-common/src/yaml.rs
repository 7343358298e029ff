//! Multi-document YAML parsing into `serde_json::Value`
//!
//! Release manifests are streams of `---` separated documents. yaml-rust2
//! parses them, and each document is converted to JSON so resources can be
//! handled as untyped objects.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse a single YAML document. Empty input yields `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = load(input)?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse every non-empty document in a YAML stream
///
/// Documents that are empty or only comments are skipped, so a trailing `---`
/// does not produce a null entry.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, Error> {
    load(input)?
        .into_iter()
        .filter(|doc| !matches!(doc, Yaml::Null))
        .map(yaml_to_json)
        .collect()
}

fn load(input: &str) -> Result<Vec<Yaml>, Error> {
    YamlLoader::load_from_str(input)
        .map_err(|e| Error::serialization(format!("invalid YAML: {e}")))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|_| Error::serialization(format!("invalid float: {s}")))?;
            Ok(Number::from_f64(f).map_or(Value::Null, Value::Number))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(items) => items
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(hash) => {
            let mut object = Map::with_capacity(hash.len());
            for (k, v) in hash {
                object.insert(key_to_string(k)?, yaml_to_json(v)?);
            }
            Ok(Value::Object(object))
        }
        Yaml::Alias(_) => Err(Error::serialization("YAML aliases are not supported")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}

fn key_to_string(key: Yaml) -> Result<String, Error> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(Error::serialization("unsupported YAML key type")),
    }
}
