//! Advisory sync blocks.
//!
//! An entity `(site, component, id)` is blocked while at least one named
//! operation holds it. Blocks live in memory only and are not enforced by
//! storage; callers check [`SyncCoordinator::is_blocked`] and skip.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use campus_types::{SessionContext, SiteId};

/// Operation name used when a caller does not give one.
pub const DEFAULT_OPERATION: &str = "-";

type BlockKey = (SiteId, String, String);

/// Tracks which entities are being synchronized.
pub struct SyncCoordinator {
    context: Arc<dyn SessionContext>,
    blocks: Mutex<HashMap<BlockKey, BTreeSet<String>>>,
}

impl SyncCoordinator {
    pub fn new(context: Arc<dyn SessionContext>) -> Self {
        Self {
            context,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Register `operation` as blocking the entity.
    ///
    /// Returns false when no site was given and none is current.
    pub fn block_operation(
        &self,
        component: &str,
        id: impl Display,
        operation: Option<&str>,
        site_id: Option<&SiteId>,
    ) -> bool {
        let Some(key) = self.key(component, id, site_id) else {
            return false;
        };
        let operation = operation.unwrap_or(DEFAULT_OPERATION).to_string();
        tracing::debug!(site_id = %key.0, component, id = %key.2, operation = %operation, "Block sync");

        self.lock().entry(key).or_default().insert(operation);
        true
    }

    /// Release one operation. Other operations on the entity stay.
    pub fn unblock_operation(
        &self,
        component: &str,
        id: impl Display,
        operation: Option<&str>,
        site_id: Option<&SiteId>,
    ) {
        let Some(key) = self.key(component, id, site_id) else {
            return;
        };
        let operation = operation.unwrap_or(DEFAULT_OPERATION);

        let mut blocks = self.lock();
        if let Some(operations) = blocks.get_mut(&key) {
            operations.remove(operation);
            if operations.is_empty() {
                blocks.remove(&key);
            }
        }
        tracing::debug!(site_id = %key.0, component, id = %key.2, operation, "Unblock sync");
    }

    /// Whether any operation holds the entity.
    pub fn is_blocked(&self, component: &str, id: impl Display, site_id: Option<&SiteId>) -> bool {
        let Some(key) = self.key(component, id, site_id) else {
            return false;
        };
        self.lock()
            .get(&key)
            .map(|operations| !operations.is_empty())
            .unwrap_or(false)
    }

    /// Operations currently holding the entity, sorted.
    pub fn blocking_operations(
        &self,
        component: &str,
        id: impl Display,
        site_id: Option<&SiteId>,
    ) -> Vec<String> {
        let Some(key) = self.key(component, id, site_id) else {
            return Vec::new();
        };
        self.lock()
            .get(&key)
            .map(|operations| operations.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Release every operation on one entity.
    pub fn clear_blocks(&self, component: &str, id: impl Display, site_id: Option<&SiteId>) {
        if let Some(key) = self.key(component, id, site_id) {
            self.lock().remove(&key);
        }
    }

    /// Release every block of one site, or of all sites when `site_id` is `None`.
    pub fn clear_all_blocks(&self, site_id: Option<&SiteId>) {
        let mut blocks = self.lock();
        match site_id {
            Some(site_id) => blocks.retain(|(site, _, _), _| site != site_id),
            None => blocks.clear(),
        }
        tracing::debug!(site_id = ?site_id, "Cleared sync blocks");
    }

    fn key(&self, component: &str, id: impl Display, site_id: Option<&SiteId>) -> Option<BlockKey> {
        let site_id = self.context.resolve_site_id(site_id)?;
        Some((site_id, component.to_string(), id.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BlockKey, BTreeSet<String>>> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
