//! Typed query functions organized by table.

pub mod current_site;
pub mod schema_versions;
pub mod sites;
