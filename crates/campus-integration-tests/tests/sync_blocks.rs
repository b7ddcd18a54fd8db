//! Integration test: sync blocks and sync records of a site.

use campus_integration_tests::{memory_manager, scripted_remote, EventLog, SITE_URL};
use campus_session::LogoutOptions;
use campus_sync::records;
use campus_types::{now_millis, EventKind};

#[tokio::test]
async fn block_survives_until_its_own_operation_is_released() {
    let manager = memory_manager(scripted_remote("student")).expect("manager");
    manager
        .new_site(SITE_URL, "tok", "", true, None)
        .await
        .expect("new site");
    let sync = manager.sync();

    assert!(sync.block_operation("quiz", 5, Some("upload"), None));
    assert!(sync.is_blocked("quiz", 5, None));
    assert!(sync.is_blocked("quiz", "5", None));

    sync.unblock_operation("quiz", 5, Some("download"), None);
    assert!(sync.is_blocked("quiz", 5, None));

    sync.unblock_operation("quiz", 5, Some("upload"), None);
    assert!(!sync.is_blocked("quiz", 5, None));
}

#[tokio::test]
async fn blocks_are_scoped_to_the_site() {
    let manager = memory_manager(scripted_remote("student")).expect("manager");
    let site_id = manager
        .new_site(SITE_URL, "tok", "", true, None)
        .await
        .expect("new site");
    let sync = manager.sync();

    sync.block_operation("assign", 3, Some("submit"), None);
    sync.block_operation("assign", 3, None, None);
    assert_eq!(
        sync.blocking_operations("assign", 3, Some(&site_id)),
        vec!["-".to_string(), "submit".to_string()]
    );

    let other = campus_types::SiteId::new("other-site");
    assert!(!sync.is_blocked("assign", 3, Some(&other)));
}

#[tokio::test]
async fn logout_releases_site_blocks() {
    let manager = memory_manager(scripted_remote("student")).expect("manager");
    let (logouts, _sub) = EventLog::record(manager.events(), EventKind::Logout);
    let site_id = manager
        .new_site(SITE_URL, "tok", "", true, None)
        .await
        .expect("new site");
    let sync = manager.sync();
    sync.block_operation("quiz", 5, Some("upload"), None);

    manager.logout(LogoutOptions::default()).await.expect("logout");

    assert!(!sync.is_blocked("quiz", 5, Some(&site_id)));
    assert_eq!(logouts.site_ids(), vec![Some(site_id.clone())]);

    // With no current site a block needs an explicit site.
    assert!(!sync.block_operation("quiz", 5, Some("upload"), None));
    assert!(sync.block_operation("quiz", 5, Some("upload"), Some(&site_id)));
}

#[tokio::test]
async fn sync_records_track_time_and_warnings() {
    let manager = memory_manager(scripted_remote("student")).expect("manager");
    manager
        .new_site(SITE_URL, "tok", "", true, None)
        .await
        .expect("new site");
    let site = manager.required_current_site().expect("current");
    let conn = site.db().lock().await;
    let now = now_millis();

    assert_eq!(records::get_sync_time(&conn, "mod_quiz", "5").expect("time"), 0);
    assert!(records::is_sync_needed(&conn, "mod_quiz", "5", 60_000, now).expect("needed"));

    records::set_sync_time(&conn, "mod_quiz", "5", now).expect("set time");
    assert!(!records::is_sync_needed(&conn, "mod_quiz", "5", 60_000, now + 1_000).expect("needed"));
    assert!(records::is_sync_needed(&conn, "mod_quiz", "5", 60_000, now + 60_000).expect("needed"));

    let warnings = vec!["Attempt 2 was discarded".to_string()];
    records::set_sync_warnings(&conn, "mod_quiz", "5", &warnings).expect("set warnings");
    assert_eq!(
        records::get_sync_warnings(&conn, "mod_quiz", "5").expect("warnings"),
        warnings
    );
    assert_eq!(records::get_sync_time(&conn, "mod_quiz", "5").expect("time"), now);
}
