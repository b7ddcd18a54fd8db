//! Per-site database handles.
//!
//! Every site gets its own SQLite database so that deleting an account is a
//! matter of dropping one file. Handles are opened lazily and shared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use campus_types::SiteId;
use rusqlite::Connection;

use crate::{schema, DbError, Result};

/// A connection shared between async tasks.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// Where databases and site files live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// Everything in memory; nothing survives the process.
    Memory,
    /// `<dir>/app.db` and `<dir>/sites/<site_id>/`.
    Directory(PathBuf),
}

impl StorageLocation {
    pub fn app_db_path(&self) -> Option<PathBuf> {
        match self {
            StorageLocation::Memory => None,
            StorageLocation::Directory(dir) => Some(dir.join("app.db")),
        }
    }

    pub fn site_dir(&self, site_id: &SiteId) -> Option<PathBuf> {
        match self {
            StorageLocation::Memory => None,
            StorageLocation::Directory(dir) => Some(dir.join("sites").join(site_id.as_str())),
        }
    }

    pub fn site_db_path(&self, site_id: &SiteId) -> Option<PathBuf> {
        self.site_dir(site_id).map(|dir| dir.join("site.db"))
    }

    /// Folder holding files downloaded for the site.
    pub fn site_files_dir(&self, site_id: &SiteId) -> Option<PathBuf> {
        self.site_dir(site_id).map(|dir| dir.join("files"))
    }
}

/// Registry of open per-site databases.
pub struct SiteDatabases {
    location: StorageLocation,
    open: Mutex<HashMap<SiteId, SharedConnection>>,
}

impl SiteDatabases {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Get the database of a site, opening (and creating) it if needed.
    pub fn open(&self, site_id: &SiteId) -> Result<SharedConnection> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = open.get(site_id) {
            return Ok(Arc::clone(conn));
        }

        let conn = match self.location.site_db_path(site_id) {
            Some(path) => open_site_file(&path)?,
            None => Connection::open_in_memory()?,
        };
        crate::configure(&conn)?;
        conn.execute_batch(schema::SCHEMA_VERSIONS_TABLE)?;

        tracing::debug!(site_id = %site_id, "Opened site database");
        let conn = Arc::new(tokio::sync::Mutex::new(conn));
        open.insert(site_id.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    pub fn is_open(&self, site_id: &SiteId) -> bool {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(site_id)
    }

    /// Close and delete the database of a site.
    ///
    /// Handles still held elsewhere keep working against the unlinked file
    /// until they are dropped.
    pub fn delete(&self, site_id: &SiteId) -> Result<()> {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(site_id);

        let Some(path) = self.location.site_db_path(site_id) else {
            return Ok(());
        };

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            remove_file_if_exists(Path::new(&file))?;
        }
        tracing::info!(site_id = %site_id, "Deleted site database");
        Ok(())
    }

    /// Remove the site folder, including downloaded files.
    pub fn delete_folder(&self, site_id: &SiteId) -> Result<()> {
        let Some(dir) = self.location.site_dir(site_id) else {
            return Ok(());
        };
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::StorageUnavailable(format!("{}: {e}", dir.display()))),
        }
    }
}

fn open_site_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DbError::StorageUnavailable(format!("{}: {e}", parent.display())))?;
    }
    Ok(Connection::open(path)?)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DbError::StorageUnavailable(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let location = StorageLocation::Directory(PathBuf::from("/data"));
        let id = SiteId::new("abc");
        assert_eq!(location.app_db_path(), Some(PathBuf::from("/data/app.db")));
        assert_eq!(
            location.site_db_path(&id),
            Some(PathBuf::from("/data/sites/abc/site.db"))
        );
        assert_eq!(
            location.site_files_dir(&id),
            Some(PathBuf::from("/data/sites/abc/files"))
        );
        assert_eq!(StorageLocation::Memory.site_dir(&id), None);
    }

    #[tokio::test]
    async fn test_open_reuses_handle() {
        let dbs = SiteDatabases::new(StorageLocation::Memory);
        let id = SiteId::new("abc");
        let first = dbs.open(&id).expect("open");
        let second = dbs.open(&id).expect("open again");
        assert!(Arc::ptr_eq(&first, &second));

        let conn = first.lock().await;
        assert!(crate::table::table_exists(&conn, "schema_versions").expect("exists"));
    }

    #[test]
    fn test_delete_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let location = StorageLocation::Directory(dir.path().to_path_buf());
        let dbs = SiteDatabases::new(location.clone());
        let id = SiteId::new("abc");

        let conn = dbs.open(&id).expect("open");
        drop(conn);
        let db_path = location.site_db_path(&id).expect("path");
        assert!(db_path.exists());
        std::fs::create_dir_all(location.site_files_dir(&id).expect("files")).expect("mkdir");

        dbs.delete(&id).expect("delete");
        assert!(!dbs.is_open(&id));
        assert!(!db_path.exists());

        dbs.delete_folder(&id).expect("delete folder");
        assert!(!location.site_dir(&id).expect("dir").exists());

        // Deleting again is fine.
        dbs.delete(&id).expect("delete again");
        dbs.delete_folder(&id).expect("delete folder again");
    }
}
