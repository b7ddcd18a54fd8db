//! campus-daemon: hosts the session manager of the Campus client.
//!
//! Single OS process running a Tokio async runtime. Front ends talk to the
//! daemon via JSON-RPC over a Unix socket in the data directory.

mod commands;
mod config;
mod events;
mod rpc;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use campus_db::StorageLocation;
use campus_session::{HttpRemote, SessionManager};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub manager: SessionManager,
    pub config: DaemonConfig,
    pub data_dir: PathBuf,
    pub started_at: Instant,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;
    init_tracing(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Campus daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open storage and the session manager
    let remote = HttpRemote::new(config.remote_timeout(), &config.remote.user_agent)?;
    let manager = SessionManager::new(
        StorageLocation::Directory(data_dir.clone()),
        Arc::new(remote),
        config.session_config(),
        Vec::new(),
    )?;

    // 3. Global handler for expired sessions, then restore the last session
    let expiry_handler = events::spawn_session_expired_handler(manager.clone());
    match manager.restore_session().await {
        Some(site_id) => info!(site_id = %site_id, "Restored session"),
        None => info!("No session to restore"),
    }

    // 4. Build daemon state
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let state = Arc::new(DaemonState {
        manager,
        config,
        data_dir: data_dir.clone(),
        started_at: Instant::now(),
        shutdown_tx: shutdown_tx.clone(),
    });

    // 5. Run the RPC server until shutdown
    let socket_path = data_dir.join("campus.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "RPC server error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    expiry_handler.abort();

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

/// Install the `tracing` subscriber, writing to the configured log file or stderr.
fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("campus={}", config.advanced.log_level).parse()?);

    if config.advanced.log_file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.advanced.log_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_session::{ScriptedRemote, SessionConfig};
    use campus_types::{SiteFunction, SiteInfo};
    use serde_json::json;

    pub const SITE_URL: &str = "https://school.example";

    fn site_info() -> SiteInfo {
        SiteInfo {
            sitename: "School".into(),
            username: "student".into(),
            fullname: "Student One".into(),
            siteurl: SITE_URL.into(),
            userid: 3,
            version: Some("2023042400".into()),
            functions: ["tool_mobile_get_config", "core_course_get_courses"]
                .iter()
                .map(|name| SiteFunction {
                    name: name.to_string(),
                    version: "1".into(),
                })
                .collect(),
            ..SiteInfo::default()
        }
    }

    /// Daemon state over in-memory storage and a scripted site.
    pub fn scripted_state() -> (Arc<DaemonState>, Arc<ScriptedRemote>) {
        let remote = Arc::new(ScriptedRemote::new());
        remote.respond(
            "core_webservice_get_site_info",
            serde_json::to_value(site_info()).expect("info"),
        );
        remote.respond("tool_mobile_get_config", json!({"settings": []}));

        let manager = SessionManager::new(
            StorageLocation::Memory,
            remote.clone(),
            SessionConfig {
                refresh_info_on_load: false,
                ..SessionConfig::default()
            },
            Vec::new(),
        )
        .expect("manager");
        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(DaemonState {
            manager,
            config: DaemonConfig::default(),
            data_dir: PathBuf::from("/tmp/campus-test"),
            started_at: Instant::now(),
            shutdown_tx,
        });
        (state, remote)
    }

    pub fn test_state() -> Arc<DaemonState> {
        scripted_state().0
    }

    #[test]
    fn test_daemon_config_feeds_session() {
        let (state, _remote) = scripted_state();
        assert_eq!(state.config.session_config().extended_service.as_deref(), Some("local_mobile"));
        assert!(!state.manager.config().refresh_info_on_load);
    }
}
