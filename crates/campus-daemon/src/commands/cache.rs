//! WS cache invalidation commands. Each targets `site_id` or the current site.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{optional_site_id, required_str, Result};
use crate::DaemonState;

pub async fn invalidate_key(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = required_str(params, "key")?;
    let site = state.manager.get_site(optional_site_id(params).as_ref()).await?;
    let invalidated = site.invalidate_ws_cache_for_key(key).await?;
    Ok(json!({"invalidated": invalidated}))
}

pub async fn invalidate_prefix(state: &Arc<DaemonState>, params: &Value) -> Result {
    let prefix = required_str(params, "prefix")?;
    let site = state.manager.get_site(optional_site_id(params).as_ref()).await?;
    let invalidated = site.invalidate_ws_cache_for_key_prefix(prefix).await?;
    Ok(json!({"invalidated": invalidated}))
}

pub async fn invalidate_all(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site = state.manager.get_site(optional_site_id(params).as_ref()).await?;
    let invalidated = site.invalidate_ws_cache().await?;
    Ok(json!({"invalidated": invalidated}))
}
