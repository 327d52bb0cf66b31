//! Redaction of command configs before they reach logs or status files.

use crate::job::ConfigMap;
use serde_json::Value;

/// Replacement written in place of a sensitive value.
pub const REDACTED: &str = "********";

/// Key whose value may arrive as a comma-joined string but is stored as a list.
pub const CASE_LIST_KEY: &str = "OVERWRITE_HASAL_SUITE_CASE_LIST";

const SENSITIVE_FRAGMENTS: &[&str] = &["password", "passwd", "secret", "token", "credential", "api_key"];

/// Whether a config key names a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Copy of `config` safe to record: credentials redacted (nested maps too),
/// the case list normalised to a sequence.
pub fn mask_config(config: &ConfigMap) -> ConfigMap {
    config
        .iter()
        .map(|(key, value)| {
            let masked = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else if key == CASE_LIST_KEY {
                normalize_case_list(value)
            } else {
                mask_value(value)
            };
            (key.clone(), masked)
        })
        .collect()
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(mask_config(map)),
        Value::Array(items) => Value::Array(items.iter().map(mask_value).collect()),
        other => other.clone(),
    }
}

fn normalize_case_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::String(joined) if joined.is_empty() => Value::Array(vec![]),
        Value::String(joined) => Value::Array(
            joined
                .split(',')
                .map(|case| Value::String(case.to_string()))
                .collect(),
        ),
        other => Value::Array(vec![other.clone()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(value: Value) -> ConfigMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_masks_credentials() {
        let masked = mask_config(&config(json!({
            "PULSE_PASSWORD": "hunter2",
            "upload_token": "abc",
            "MAX_RUN": 30
        })));

        assert_eq!(masked["PULSE_PASSWORD"], json!(REDACTED));
        assert_eq!(masked["upload_token"], json!(REDACTED));
        assert_eq!(masked["MAX_RUN"], json!(30));
        assert!(!serde_json::to_string(&masked).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_masks_nested_credentials() {
        let masked = mask_config(&config(json!({
            "perfherder": {"client_secret": "s3cret", "host": "example.org"}
        })));
        assert_eq!(
            masked["perfherder"],
            json!({"client_secret": REDACTED, "host": "example.org"})
        );
    }

    #[test]
    fn test_case_list_from_string() {
        let masked = mask_config(&config(json!({
            CASE_LIST_KEY: "test_a,test_b"
        })));
        assert_eq!(masked[CASE_LIST_KEY], json!(["test_a", "test_b"]));
    }

    #[test]
    fn test_case_list_sequence_kept() {
        let masked = mask_config(&config(json!({
            CASE_LIST_KEY: ["test_a"]
        })));
        assert_eq!(masked[CASE_LIST_KEY], json!(["test_a"]));
    }

    #[test]
    fn test_input_untouched() {
        let input = config(json!({"password": "hunter2"}));
        let _ = mask_config(&input);
        assert_eq!(input["password"], json!("hunter2"));
    }
}
