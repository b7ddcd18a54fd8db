//! Site schemas every site gets.

use campus_db::SiteSchema;

/// Core schemas: the web service cache and the sync records.
pub fn core_schemas() -> Vec<SiteSchema> {
    vec![
        campus_cache::store::site_schema(),
        campus_sync::records::site_schema(),
    ]
}
