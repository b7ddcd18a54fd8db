//! Site registry and session commands.

use std::sync::Arc;

use campus_session::LogoutOptions;
use campus_types::SiteId;
use serde_json::{json, Value};

use super::{optional_bool, optional_site_id, optional_str, required_site_id, required_str, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Stored sites, sorted unless `sorted` is false, optionally limited to `ids`.
pub async fn list(state: &Arc<DaemonState>, params: &Value) -> Result {
    let ids: Option<Vec<SiteId>> = match params.get("ids") {
        None | Some(Value::Null) => None,
        Some(ids) => Some(
            serde_json::from_value(ids.clone())
                .map_err(|_| RpcError::invalid_params("ids must be a list of site ids"))?,
        ),
    };

    let sites = if optional_bool(params, "sorted", true) {
        state.manager.get_sorted_sites(ids.as_deref()).await?
    } else {
        state.manager.get_sites(ids.as_deref()).await?
    };
    Ok(json!(sites))
}

/// The current site, or null.
pub async fn current(state: &Arc<DaemonState>) -> Result {
    Ok(match state.manager.current_site() {
        Some(site) => json!(site.basic_info()),
        None => Value::Null,
    })
}

/// Authenticate a token against a site and store the account.
pub async fn add(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_url = required_str(params, "site_url")?;
    let token = required_str(params, "token")?;
    let private_token = optional_str(params, "private_token").unwrap_or_default();
    let login = optional_bool(params, "login", true);
    let oauth_id = params.get("oauth_id").and_then(|v| v.as_i64());

    let site_id = state
        .manager
        .new_site(site_url, token, private_token, login, oauth_id)
        .await?;
    Ok(json!({"site_id": site_id}))
}

/// Make a stored site current, unless its session needs a new login.
pub async fn load(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = required_site_id(params)?;
    let redirect = match params.get("redirect") {
        None | Some(Value::Null) => None,
        Some(redirect) => Some(
            serde_json::from_value(redirect.clone())
                .map_err(|_| RpcError::invalid_params("malformed redirect"))?,
        ),
    };

    let loaded = state.manager.load_site(&site_id, redirect).await?;
    Ok(json!({"loaded": loaded}))
}

pub async fn login(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = required_site_id(params)?;
    state.manager.login(&site_id).await?;
    Ok(json!({"site_id": site_id}))
}

pub async fn logout(state: &Arc<DaemonState>, params: &Value) -> Result {
    let options = LogoutOptions {
        force_logout: optional_bool(params, "force_logout", false),
        remove_account: optional_bool(params, "remove_account", false),
    };
    let site_id = state.manager.current_site_id();
    state.manager.logout(options).await?;
    Ok(json!({"site_id": site_id}))
}

pub async fn delete(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = required_site_id(params)?;
    state.manager.delete_site(&site_id).await?;
    Ok(json!({"deleted": true}))
}

/// Replace the credentials of a site and, unless `login` is false, make it current.
pub async fn update_token(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = required_site_id(params)?;
    let token = required_str(params, "token")?;
    let private_token = optional_str(params, "private_token").unwrap_or_default();

    state
        .manager
        .update_site_token_by_site_id(&site_id, token, private_token)
        .await?;
    if optional_bool(params, "login", true) {
        state.manager.login(&site_id).await?;
    }
    Ok(json!({"site_id": site_id}))
}

/// Refresh info and config of a site (the current one by default).
pub async fn refresh_info(state: &Arc<DaemonState>, params: &Value) -> Result {
    let site_id = optional_site_id(params);
    state.manager.update_site_info(site_id.as_ref()).await?;
    let site = state.manager.get_site(site_id.as_ref()).await?;
    Ok(json!(site.basic_info()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{scripted_state, SITE_URL};

    #[tokio::test]
    async fn test_add_list_and_delete() {
        let (state, _remote) = scripted_state();

        let added = add(&state, &json!({"site_url": SITE_URL, "token": "tok"}))
            .await
            .expect("add");
        let site_id = added["site_id"].as_str().expect("id").to_string();

        let current = current(&state).await.expect("current");
        assert_eq!(current["id"], site_id.as_str());

        let sites = list(&state, &json!({})).await.expect("list");
        assert_eq!(sites.as_array().map(Vec::len), Some(1));

        delete(&state, &json!({"site_id": site_id}))
            .await
            .expect("delete");
        assert_eq!(super::current(&state).await.expect("current"), Value::Null);

        let missing = delete(&state, &json!({"site_id": site_id})).await;
        assert_eq!(missing.map_err(|e| e.code), Err(-32004));
    }

    #[tokio::test]
    async fn test_logout_and_reload() {
        let (state, _remote) = scripted_state();
        let added = add(&state, &json!({"site_url": SITE_URL, "token": "tok"}))
            .await
            .expect("add");
        let site_id = added["site_id"].clone();

        logout(&state, &json!({})).await.expect("logout");
        assert_eq!(current(&state).await.expect("current"), Value::Null);

        let loaded = load(&state, &json!({"site_id": site_id})).await.expect("load");
        assert_eq!(loaded["loaded"], true);

        logout(&state, &json!({"force_logout": true})).await.expect("logout");
        let loaded = load(&state, &json!({"site_id": site_id})).await.expect("load");
        assert_eq!(loaded["loaded"], false);

        update_token(&state, &json!({"site_id": site_id, "token": "fresh"}))
            .await
            .expect("update token");
        let current = current(&state).await.expect("current");
        assert_eq!(current["logged_out"], false);
    }

    #[tokio::test]
    async fn test_refresh_without_current_site() {
        let (state, _remote) = scripted_state();
        let result = refresh_info(&state, &json!({})).await;
        assert_eq!(result.map_err(|e| e.code), Err(-32010));
    }
}
