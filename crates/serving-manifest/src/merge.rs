//! Recursive merge of desired fields into a live object
//!
//! Only fields present in the desired object are written; fields the server
//! or other controllers added survive. Maps are merged key by key, except a
//! key named `data` (ConfigMap and Secret payloads), which is replaced as a
//! whole when it differs so keys removed from the desired object disappear.
//! Any other value, including lists, is replaced when it differs.

use serde_json::{Map, Value};

const REPLACED_WHOLE: &str = "data";

/// Merge `desired` into `live`, returning whether `live` changed
pub fn update_changed(desired: &Map<String, Value>, live: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, want) in desired {
        if key == REPLACED_WHOLE {
            if live.get(key) != Some(want) {
                live.insert(key.clone(), want.clone());
                changed = true;
            }
            continue;
        }

        let merged = match (want, live.get_mut(key)) {
            (Value::Object(want_map), Some(Value::Object(live_map))) => {
                Some(update_changed(want_map, live_map))
            }
            (_, Some(have)) if have == want => Some(false),
            _ => None,
        };
        match merged {
            Some(nested) => changed |= nested,
            None => {
                live.insert(key.clone(), want.clone());
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn unchanged_when_desired_is_subset_of_live() {
        let desired = obj(json!({"spec": {"replicas": 1}}));
        let mut live = obj(json!({
            "spec": {"replicas": 1, "strategy": {"type": "RollingUpdate"}},
            "status": {"readyReplicas": 1}
        }));
        let before = live.clone();
        assert!(!update_changed(&desired, &mut live));
        assert_eq!(live, before);
    }

    #[test]
    fn nested_maps_merge_and_keep_server_fields() {
        let desired = obj(json!({"metadata": {"labels": {"app": "activator"}}}));
        let mut live = obj(json!({
            "metadata": {"labels": {"app": "old"}, "resourceVersion": "42"}
        }));
        assert!(update_changed(&desired, &mut live));
        assert_eq!(live["metadata"]["labels"]["app"], "activator");
        assert_eq!(live["metadata"]["resourceVersion"], "42");
    }

    #[test]
    fn data_is_replaced_wholesale() {
        let desired = obj(json!({"data": {"a": "1"}}));
        let mut live = obj(json!({"data": {"a": "1", "stale": "x"}}));
        assert!(update_changed(&desired, &mut live));
        assert_eq!(live["data"], json!({"a": "1"}));

        assert!(!update_changed(&desired, &mut live));
    }

    #[test]
    fn data_key_is_replaced_at_any_depth() {
        let desired = obj(json!({"spec": {"data": {"k": "v"}}}));
        let mut live = obj(json!({"spec": {"data": {"k": "v", "extra": "y"}, "other": 1}}));
        assert!(update_changed(&desired, &mut live));
        assert_eq!(live["spec"]["data"], json!({"k": "v"}));
        assert_eq!(live["spec"]["other"], 1);
    }

    #[test]
    fn lists_are_replaced_not_merged() {
        let desired = obj(json!({"spec": {"servers": [{"port": 80}]}}));
        let mut live = obj(json!({"spec": {"servers": [{"port": 80}, {"port": 443}]}}));
        assert!(update_changed(&desired, &mut live));
        assert_eq!(live["spec"]["servers"], json!([{"port": 80}]));
    }

    #[test]
    fn non_map_target_is_replaced_by_map() {
        let desired = obj(json!({"spec": {"selector": {"istio": "gw"}}}));
        let mut live = obj(json!({"spec": {"selector": null}}));
        assert!(update_changed(&desired, &mut live));
        assert_eq!(live["spec"]["selector"]["istio"], "gw");
    }

    #[test]
    fn second_merge_is_a_no_op() {
        let desired = obj(json!({
            "metadata": {"annotations": {"a": "b"}},
            "spec": {"template": {"spec": {"containers": [{"name": "c", "image": "i"}]}}}
        }));
        let mut live = obj(json!({"metadata": {"uid": "123"}}));
        assert!(update_changed(&desired, &mut live));
        assert!(!update_changed(&desired, &mut live));
    }
}
