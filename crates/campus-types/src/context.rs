//! Narrow view of the active session handed to components that only need
//! to know which site is current.

use crate::SiteId;

/// Read access to the current site pointer.
pub trait SessionContext: Send + Sync {
    /// Id of the current site, if a site is active.
    fn current_site_id(&self) -> Option<SiteId>;

    /// Resolve an explicit site id, falling back to the current site.
    fn resolve_site_id(&self, site_id: Option<&SiteId>) -> Option<SiteId> {
        site_id.cloned().or_else(|| self.current_site_id())
    }
}
