//! The persisted current-site pointer (app database).

use campus_types::SiteId;
use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// Stored current site, if any.
pub fn get(conn: &Connection) -> Result<Option<SiteId>> {
    let id: Option<String> = conn
        .query_row("SELECT site_id FROM current_site WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id.map(SiteId::from))
}

/// Store the current site.
pub fn set(conn: &Connection, site_id: &SiteId) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO current_site (id, site_id) VALUES (1, ?1)",
        [site_id.as_str()],
    )?;
    Ok(())
}

/// Forget the current site.
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM current_site", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_lifecycle() {
        let conn = crate::open_memory().expect("open");
        assert_eq!(get(&conn).expect("get"), None);

        set(&conn, &SiteId::new("a")).expect("set");
        set(&conn, &SiteId::new("b")).expect("replace");
        assert_eq!(get(&conn).expect("get"), Some(SiteId::new("b")));

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM current_site", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);

        clear(&conn).expect("clear");
        assert_eq!(get(&conn).expect("get"), None);
    }
}
