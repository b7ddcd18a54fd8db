//! Diagnostics command handlers.

use std::sync::Arc;

use serde_json::json;

use super::Result;
use crate::DaemonState;

/// Daemon and session overview.
pub async fn status(state: &Arc<DaemonState>) -> Result {
    let manager = &state.manager;
    let sites = manager.get_sites_ids().await?;
    let logged_in = manager.get_logged_in_sites_ids().await?;

    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "data_dir": state.data_dir.display().to_string(),
        "log_level": state.config.advanced.log_level,
        "current_site_id": manager.current_site_id(),
        "logged_in": manager.is_logged_in(),
        "sites": sites.len(),
        "logged_in_sites": logged_in.len(),
        "loaded_sites": manager.loaded_sites(),
        "session_restored": manager.events().has_triggered_unique(campus_types::EventKind::SessionRestored),
    }))
}

/// Ask the daemon to stop after answering.
pub fn shutdown(state: &Arc<DaemonState>) -> Result {
    tracing::info!("Shutdown requested over IPC");
    let _ = state.shutdown_tx.send(());
    Ok(json!({"stopping": true}))
}
