//! Sync block commands.
//!
//! Blocks are advisory: callers check `sync.is_blocked` before syncing an
//! entity that a user-facing operation is editing.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{entity_id, optional_site_id, optional_str, required_str, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

pub fn block(state: &Arc<DaemonState>, params: &Value) -> Result {
    let component = required_str(params, "component")?;
    let id = entity_id(params)?;
    let site_id = optional_site_id(params);

    let blocked = state.manager.sync().block_operation(
        component,
        &id,
        optional_str(params, "operation"),
        site_id.as_ref(),
    );
    if !blocked {
        return Err(RpcError::no_current_site());
    }
    Ok(json!({"blocked": true}))
}

pub fn unblock(state: &Arc<DaemonState>, params: &Value) -> Result {
    let component = required_str(params, "component")?;
    let id = entity_id(params)?;
    let site_id = optional_site_id(params);

    state.manager.sync().unblock_operation(
        component,
        &id,
        optional_str(params, "operation"),
        site_id.as_ref(),
    );
    let operations = state
        .manager
        .sync()
        .blocking_operations(component, &id, site_id.as_ref());
    Ok(json!({"blocked": !operations.is_empty(), "operations": operations}))
}

pub fn is_blocked(state: &Arc<DaemonState>, params: &Value) -> Result {
    let component = required_str(params, "component")?;
    let id = entity_id(params)?;
    let site_id = optional_site_id(params);

    let operations = state
        .manager
        .sync()
        .blocking_operations(component, &id, site_id.as_ref());
    Ok(json!({"blocked": !operations.is_empty(), "operations": operations}))
}

/// Clear one entity when `component` and `id` are given, otherwise a whole
/// site, otherwise everything.
pub fn clear(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = optional_site_id(params);
    let sync = state.manager.sync();

    match optional_str(params, "component") {
        Some(component) => {
            let id = entity_id(params)?;
            sync.clear_blocks(component, &id, site_id.as_ref());
        }
        None => sync.clear_all_blocks(site_id.as_ref()),
    }
    Ok(json!({"cleared": true}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::scripted_state;

    #[tokio::test]
    async fn test_block_lifecycle() {
        let (state, _remote) = scripted_state();
        let target = json!({"component": "mod_quiz", "id": 12, "site_id": "site-a"});

        block(&state, &json!({"component": "mod_quiz", "id": 12, "site_id": "site-a", "operation": "attempt"}))
            .expect("block");
        block(&state, &target).expect("block");

        let status = is_blocked(&state, &target).expect("status");
        assert_eq!(status["blocked"], true);
        assert_eq!(status["operations"], json!(["-", "attempt"]));

        let status = unblock(&state, &target).expect("unblock");
        assert_eq!(status["operations"], json!(["attempt"]));

        clear(&state, &json!({"site_id": "site-a"})).expect("clear");
        let status = is_blocked(&state, &target).expect("status");
        assert_eq!(status["blocked"], false);
    }

    #[tokio::test]
    async fn test_block_without_site() {
        let (state, _remote) = scripted_state();
        let result = block(&state, &json!({"component": "mod_quiz", "id": 1}));
        assert_eq!(result.map_err(|e| e.code), Err(-32010));

        let result = block(&state, &json!({"component": "mod_quiz"}));
        assert_eq!(result.map_err(|e| e.code), Err(-32602));
    }
}
