//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC calls to the command handlers. A connection
//! that calls `events.subscribe` also receives session events as
//! `event` notifications.

use std::path::PathBuf;
use std::sync::Arc;

use campus_db::DbError;
use campus_session::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::DaemonState;

/// Outgoing messages buffered per connection.
const OUTBOX_CAPACITY: usize = 256;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated message without an id.
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.to_string(),
            data,
        }
    }

    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(-32700, "PARSE_ERROR", None)
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self::new(-32600, "INVALID_REQUEST", None)
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            -32601,
            "METHOD_NOT_FOUND",
            Some(serde_json::json!({"method": method})),
        )
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(
            -32602,
            "INVALID_PARAMS",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(
            -32603,
            "INTERNAL_ERROR",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    // Session errors

    /// Site not found (-32004).
    pub fn not_found(what: &str) -> Self {
        Self::new(-32004, "NOT_FOUND", Some(serde_json::json!({"detail": what})))
    }

    /// No current site (-32010).
    pub fn no_current_site() -> Self {
        Self::new(-32010, "NO_CURRENT_SITE", None)
    }

    /// Session expired (-32011).
    pub fn session_expired(site_id: &str) -> Self {
        Self::new(
            -32011,
            "SESSION_EXPIRED",
            Some(serde_json::json!({"site_id": site_id})),
        )
    }

    /// Storage unavailable (-32020).
    pub fn storage_unavailable(detail: &str) -> Self {
        Self::new(
            -32020,
            "STORAGE_UNAVAILABLE",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Site schema migration failed (-32021).
    pub fn schema_migration_failed(schema: &str, reason: &str) -> Self {
        Self::new(
            -32021,
            "SCHEMA_MIGRATION_FAILED",
            Some(serde_json::json!({"schema": schema, "reason": reason})),
        )
    }

    /// Remote failure (-32030).
    pub fn remote_failure(errorcode: &str, message: &str) -> Self {
        Self::new(
            -32030,
            "REMOTE_FAILURE",
            Some(serde_json::json!({"errorcode": errorcode, "message": message})),
        )
    }

    /// Network unavailable (-32031).
    pub fn network_unavailable(detail: &str) -> Self {
        Self::new(
            -32031,
            "NETWORK_UNAVAILABLE",
            Some(serde_json::json!({"detail": detail})),
        )
    }

    /// Nothing cached for an offline read (-32032).
    pub fn not_cached() -> Self {
        Self::new(-32032, "NOT_CACHED", None)
    }

    /// Site or app version not acceptable (-32040).
    pub fn version_invalid(reason: &str, required: Option<&str>) -> Self {
        Self::new(
            -32040,
            "VERSION_INVALID",
            Some(serde_json::json!({"reason": reason, "required": required})),
        )
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(site_id) => RpcError::not_found(site_id.as_str()),
            SessionError::NoCurrentSite => RpcError::no_current_site(),
            SessionError::SessionExpired(site_id) => RpcError::session_expired(site_id.as_str()),
            SessionError::Db(DbError::NotFound(what)) => RpcError::not_found(&what),
            SessionError::Db(DbError::StorageUnavailable(detail)) => {
                RpcError::storage_unavailable(&detail)
            }
            SessionError::Db(DbError::SchemaMigrationFailed { schema, reason })
            | SessionError::SchemaMigrationFailed { schema, reason } => {
                RpcError::schema_migration_failed(&schema, &reason)
            }
            SessionError::Db(e) => RpcError::internal_error(&e.to_string()),
            SessionError::NetworkUnavailable(detail) => RpcError::network_unavailable(&detail),
            SessionError::RemoteCallFailed { errorcode, message } => {
                RpcError::remote_failure(&errorcode, &message)
            }
            SessionError::FunctionNotAvailable(function) => {
                RpcError::remote_failure("functionnotavailable", &function)
            }
            SessionError::InvalidResponse(detail) => {
                RpcError::remote_failure("invalidresponse", &detail)
            }
            SessionError::InvalidSiteVersion => RpcError::version_invalid("invalid_site", None),
            SessionError::LegacySiteVersion => RpcError::version_invalid("legacy_site", None),
            SessionError::AppUpdateRequired { required } => {
                RpcError::version_invalid("app_update_required", Some(&required))
            }
            SessionError::NotCached => RpcError::not_cached(),
            SessionError::InvalidSiteUrl(url) => RpcError::invalid_params(&url),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = ?self.socket_path, "IPC server listening");

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Responses and event notifications share one outbox drained by a writer
/// task, so a subscription never interleaves partial lines.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let (outbox, mut outgoing) = mpsc::channel::<String>(OUTBOX_CAPACITY);

    let write_task = tokio::spawn(async move {
        while let Some(mut line) = outgoing.recv().await {
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut forwarder: Option<tokio::task::JoinHandle<()>> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) if request.jsonrpc != "2.0" => {
                RpcResponse::error(request.id, RpcError::invalid_request())
            }
            Ok(request) if request.method == "events.subscribe" => {
                if forwarder.is_none() {
                    forwarder = Some(crate::events::forward_to_connection(
                        &state.manager,
                        outbox.clone(),
                    ));
                }
                RpcResponse::success(request.id, serde_json::json!({"subscribed": true}))
            }
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(Value::Null, RpcError::parse_error()),
        };

        if outbox.send(serde_json::to_string(&response)?).await.is_err() {
            break; // writer gone
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(outbox);
    write_task.await??;
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;

    debug!(method, "Dispatching RPC method");

    let result = match method {
        // Sites
        "sites.list" => commands::sites::list(&state, params).await,
        "sites.current" => commands::sites::current(&state).await,
        "sites.add" => commands::sites::add(&state, params).await,
        "sites.load" => commands::sites::load(&state, params).await,
        "sites.login" => commands::sites::login(&state, params).await,
        "sites.logout" => commands::sites::logout(&state, params).await,
        "sites.delete" => commands::sites::delete(&state, params).await,
        "sites.update_token" => commands::sites::update_token(&state, params).await,
        "sites.refresh_info" => commands::sites::refresh_info(&state, params).await,

        // WS cache
        "cache.invalidate_key" => commands::cache::invalidate_key(&state, params).await,
        "cache.invalidate_prefix" => commands::cache::invalidate_prefix(&state, params).await,
        "cache.invalidate_all" => commands::cache::invalidate_all(&state, params).await,

        // Sync blocks
        "sync.block" => commands::sync::block(&state, params),
        "sync.unblock" => commands::sync::unblock(&state, params),
        "sync.is_blocked" => commands::sync::is_blocked(&state, params),
        "sync.clear" => commands::sync::clear(&state, params),

        // Diagnostics
        "diagnostics.status" => commands::diagnostics::status(&state).await,
        "daemon.shutdown" => commands::diagnostics::shutdown(&state),

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
