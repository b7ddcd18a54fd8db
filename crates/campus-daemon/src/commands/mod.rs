//! IPC command handlers, one submodule per method namespace.

pub mod cache;
pub mod diagnostics;
pub mod sites;
pub mod sync;

use campus_types::SiteId;
use serde_json::Value;

use crate::rpc::RpcError;

type Result = std::result::Result<Value, RpcError>;

fn required_str<'a>(params: &'a Value, name: &str) -> std::result::Result<&'a str, RpcError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))
}

fn optional_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str())
}

fn optional_bool(params: &Value, name: &str, default: bool) -> bool {
    params.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn required_site_id(params: &Value) -> std::result::Result<SiteId, RpcError> {
    required_str(params, "site_id").map(SiteId::new)
}

/// `site_id` when given; otherwise the current site is meant.
fn optional_site_id(params: &Value) -> Option<SiteId> {
    optional_str(params, "site_id").map(SiteId::new)
}

/// Entity ids arrive as numbers or strings.
fn entity_id(params: &Value) -> std::result::Result<String, RpcError> {
    match params.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(RpcError::invalid_params("id required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_helpers() {
        let params = json!({"site_id": "abc", "id": 42, "login": false});
        assert_eq!(required_site_id(&params).expect("site"), SiteId::new("abc"));
        assert_eq!(entity_id(&params).expect("id"), "42");
        assert!(!optional_bool(&params, "login", true));
        assert!(optional_bool(&params, "missing", true));
        assert_eq!(
            required_str(&params, "token").map_err(|e| e.code),
            Err(-32602)
        );
        assert_eq!(entity_id(&json!({"id": "quiz-1"})).expect("id"), "quiz-1");
    }
}
