//! The process-wide current site pointer.

use std::sync::{Arc, RwLock};

use campus_types::{SessionContext, SiteId};

use crate::Site;

/// Holds the site the process is working with, if any.
///
/// Shared with components that only need [`SessionContext`], such as the
/// sync coordinator.
#[derive(Default)]
pub struct CurrentSite {
    site: RwLock<Option<Arc<Site>>>,
}

impl CurrentSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Site>> {
        self.site.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, site: Arc<Site>) {
        *self.site.write().unwrap_or_else(|e| e.into_inner()) = Some(site);
    }

    /// Clear the pointer, returning the site that was current.
    pub fn take(&self) -> Option<Arc<Site>> {
        self.site.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is(&self, site_id: &SiteId) -> bool {
        self.get().map(|site| site.id() == site_id).unwrap_or(false)
    }
}

impl SessionContext for CurrentSite {
    fn current_site_id(&self) -> Option<SiteId> {
        self.get().map(|site| site.id().clone())
    }
}
