//! Daemon-side consumers of session events.
//!
//! The daemon hosts the one global handler for expired sessions and pushes
//! events to IPC subscribers as JSON-RPC notifications.

use campus_session::{Delivery, SessionManager};
use campus_types::Event;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::rpc::RpcNotification;

/// Persist the logged-out flag of every site whose session expires.
pub fn spawn_session_expired_handler(manager: SessionManager) -> JoinHandle<()> {
    let mut events = manager.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Delivery {
                    event: Event::SessionExpired(_),
                    site_id: Some(site_id),
                }) => {
                    info!(site_id = %site_id, "Session expired");
                    if let Err(e) = manager.set_site_logged_out(&site_id).await {
                        warn!(site_id = %site_id, error = %e, "Could not mark site logged out");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session expired handler lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Forward every event to one connection until it goes away.
pub fn forward_to_connection(manager: &SessionManager, outbox: mpsc::Sender<String>) -> JoinHandle<()> {
    let mut events = manager.events().subscribe();
    tokio::spawn(async move {
        loop {
            let delivery = match events.recv().await {
                Ok(delivery) => delivery,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let notification = RpcNotification {
                jsonrpc: "2.0".to_string(),
                method: "event".to_string(),
                params: match serde_json::to_value(&delivery) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "Could not serialize event");
                        continue;
                    }
                },
            };
            let Ok(line) = serde_json::to_string(&notification) else {
                continue;
            };
            if outbox.send(line).await.is_err() {
                debug!("Event subscriber disconnected");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{scripted_state, SITE_URL};
    use campus_session::RemoteError;
    use serde_json::json;

    #[tokio::test]
    async fn test_expired_session_is_persisted() {
        let (state, remote) = scripted_state();
        let handler = spawn_session_expired_handler(state.manager.clone());
        crate::commands::sites::add(&state, &json!({"site_url": SITE_URL, "token": "tok"}))
            .await
            .expect("add");

        remote.fail(
            "core_course_get_courses",
            RemoteError::Ws {
                errorcode: "invalidtoken".into(),
                message: "Invalid token".into(),
            },
        );
        let site = state.manager.required_current_site().expect("current");
        let _ = site.write("core_course_get_courses", &json!({})).await;

        for _ in 0..100 {
            if !state.manager.get_logged_in_sites_ids().await.expect("ids").contains(site.id()) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(state.manager.get_logged_in_sites_ids().await.expect("ids").is_empty());
        handler.abort();
    }

    #[tokio::test]
    async fn test_forwarded_events_are_notifications() {
        let (state, _remote) = scripted_state();
        let (outbox, mut received) = mpsc::channel(8);
        let forwarder = forward_to_connection(&state.manager, outbox);

        crate::commands::sites::add(&state, &json!({"site_url": SITE_URL, "token": "tok"}))
            .await
            .expect("add");

        let line = received.recv().await.expect("notification");
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["method"], "event");
        assert_eq!(value["params"]["event"], "login");
        assert!(value.get("id").is_none());
        forwarder.abort();
    }
}
