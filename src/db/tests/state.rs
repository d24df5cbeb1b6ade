use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_fresh_database_reports_unclean_shutdown() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_clean_shutdown_survives_restart() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_clean_start().await.unwrap();
        assert!(db.was_unclean_shutdown().await.unwrap());
        db.set_clean_shutdown().await.unwrap();
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    // Starting again without shutting down looks like a crash to the next session
    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}
