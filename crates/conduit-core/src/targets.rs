//! Extraction of sandbox-relevant targets from tool arguments.
//!
//! Capability servers describe their parameters with JSON Schema but do not
//! say which ones name a resource, so the dispatcher reads a fixed set of
//! well-known argument keys.

use std::path::PathBuf;

use serde_json::Value;

use conduit_contracts::{sandbox::AccessRequest, tool::ToolDescriptor};

const PATH_KEYS: &[&str] = &["path", "paths", "source", "destination", "target", "file", "directory"];
const PROCESS_KEYS: &[&str] = &["process", "process_name", "pid_name"];
const APPLICATION_KEYS: &[&str] = &["app", "application", "app_name"];

/// Build the `AccessRequest` describing what `arguments` would touch.
pub fn access_request(descriptor: &ToolDescriptor, arguments: &Value) -> AccessRequest {
    let mut access = AccessRequest::new(descriptor.name.clone(), descriptor.side_effect_class);
    access.paths = strings_under(arguments, PATH_KEYS).into_iter().map(PathBuf::from).collect();
    access.processes = strings_under(arguments, PROCESS_KEYS);
    access.applications = strings_under(arguments, APPLICATION_KEYS);
    access.declared_bytes = declared_bytes(arguments);
    access
}

/// Every string value found under `keys`, accepting a string or an array of
/// strings per key.
fn strings_under(arguments: &Value, keys: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for key in keys {
        match arguments.get(key) {
            Some(Value::String(s)) => out.push(s.clone()),
            Some(Value::Array(items)) => {
                out.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
            }
            _ => {}
        }
    }
    out
}

fn declared_bytes(arguments: &Value) -> Option<u64> {
    if let Some(size) = arguments.get("size").and_then(Value::as_u64) {
        return Some(size);
    }
    arguments
        .get("content")
        .and_then(Value::as_str)
        .map(|s| s.len() as u64)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use conduit_contracts::tool::{ServerId, SideEffectClass, ToolDescriptor};

    use super::access_request;

    fn descriptor(class: SideEffectClass) -> ToolDescriptor {
        ToolDescriptor {
            name: "copy_file".to_string(),
            server_id: ServerId::new("filesystem"),
            parameter_schema: json!({}),
            side_effect_class: class,
            requires_confirmation: false,
        }
    }

    #[test]
    fn source_and_destination_are_both_targets() {
        let access = access_request(
            &descriptor(SideEffectClass::Write),
            &json!({ "source": "/sandbox/a.txt", "destination": "/sandbox/b.txt" }),
        );
        assert_eq!(
            access.paths,
            vec![PathBuf::from("/sandbox/a.txt"), PathBuf::from("/sandbox/b.txt")]
        );
        assert_eq!(access.side_effect_class, SideEffectClass::Write);
    }

    #[test]
    fn path_arrays_are_flattened() {
        let access = access_request(
            &descriptor(SideEffectClass::Read),
            &json!({ "paths": ["/a", "/b", 3] }),
        );
        assert_eq!(access.paths.len(), 2);
    }

    #[test]
    fn content_length_is_declared_size() {
        let access = access_request(
            &descriptor(SideEffectClass::Write),
            &json!({ "path": "/sandbox/a.txt", "content": "hello" }),
        );
        assert_eq!(access.declared_bytes, Some(5));

        let explicit = access_request(&descriptor(SideEffectClass::Write), &json!({ "size": 4096 }));
        assert_eq!(explicit.declared_bytes, Some(4096));
    }

    #[test]
    fn process_and_application_names_are_collected() {
        let access = access_request(
            &descriptor(SideEffectClass::System),
            &json!({ "process_name": "sshd", "app": "Terminal" }),
        );
        assert_eq!(access.processes, vec!["sshd".to_string()]);
        assert_eq!(access.applications, vec!["Terminal".to_string()]);
        assert!(access.paths.is_empty());
    }
}
