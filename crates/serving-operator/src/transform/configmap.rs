use std::collections::BTreeMap;

use serde_json::Value;
use serving_manifest::Resource;
use tracing::debug;

use super::Transformer;

const CONFIG_MAP_PREFIX: &str = "config-";

/// Set each key of `data` on a ConfigMap, leaving other keys in place
pub fn set_config_map_data(resource: &mut Resource, data: &BTreeMap<String, String>) {
    let target = resource.data_mut();
    for (key, value) in data {
        target.insert(key.clone(), Value::String(value.clone()));
    }
}

/// Apply `spec.config` literals to the matching `config-<suffix>` ConfigMaps
pub fn config_map_overrides(config: &BTreeMap<String, BTreeMap<String, String>>) -> Transformer {
    let config = config.clone();
    Transformer::new("config-map", move |mut resource| {
        if resource.kind() != "ConfigMap" {
            return Ok(resource);
        }
        let Some(data) = resource
            .name()
            .strip_prefix(CONFIG_MAP_PREFIX)
            .and_then(|suffix| config.get(suffix))
        else {
            return Ok(resource);
        };
        debug!(config_map = %resource.name(), keys = data.len(), "applying config overrides");
        set_config_map_data(&mut resource, data);
        Ok(resource)
    })
}
