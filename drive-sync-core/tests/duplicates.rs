mod common;

use chrono::{Duration, Utc};
use tempfile::tempdir;

use drive_sync_core::duplicates::{check_duplicates, cleanup_duplicates, render_duplicates};

use common::{test_config, MemoryDrive, ROOT};

#[tokio::test]
async fn duplicates_are_grouped_newest_first() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), &dir.path().join("staging"));
    let drive = MemoryDrive::new();
    let t = Utc::now() - Duration::hours(1);
    let old = drive.add_file(ROOT, "home.json", "{}", t);
    let new = drive.add_file(ROOT, "home.json", "{}", t + Duration::minutes(5));
    let blog = drive.add_folder(ROOT, "blog");
    drive.add_file(&blog, "post.json", "{}", t);

    let report = check_duplicates(&config, &drive).await.unwrap();

    assert_eq!(report.total_files, 3);
    assert_eq!(report.unique_paths, 2);
    assert_eq!(report.duplicates.len(), 1);
    let group = &report.duplicates[0];
    assert_eq!(group.path, "home.json");
    let ids: Vec<&str> = group.copies.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![new.as_str(), old.as_str()]);

    let text = render_duplicates(&report);
    assert!(text.contains("DUPLICATE: home.json (2 copies)"));
    assert!(text.contains("Duplicates: 1"));
}

#[tokio::test]
async fn cleanup_keeps_only_the_newest_copy() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), &dir.path().join("staging"));
    let drive = MemoryDrive::new();
    let t = Utc::now() - Duration::hours(1);
    let oldest = drive.add_file(ROOT, "about.json", "{\"v\":1}", t);
    let newest = drive.add_file(ROOT, "about.json", "{\"v\":3}", t + Duration::minutes(2));
    let middle = drive.add_file(ROOT, "about.json", "{\"v\":2}", t + Duration::minutes(1));
    let single = drive.add_file(ROOT, "home.json", "{}", t);

    let report = cleanup_duplicates(&config, &drive).await.unwrap();

    let deleted: Vec<&str> = report.removed.iter().map(|r| r.deleted.id.as_str()).collect();
    assert_eq!(deleted, vec![middle.as_str(), oldest.as_str()]);
    assert!(report.removed.iter().all(|r| r.kept.id == newest));
    assert_eq!(report.remaining_paths, 2);

    assert_eq!(drive.file_count(), 2);
    assert_eq!(drive.content(&newest).as_deref(), Some("{\"v\":3}"));
    assert!(drive.content(&single).is_some());
    assert!(drive.content(&oldest).is_none());
}

#[tokio::test]
async fn cleanup_without_duplicates_deletes_nothing() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), &dir.path().join("staging"));
    let drive = MemoryDrive::new();
    drive.add_file(ROOT, "home.json", "{}", Utc::now());

    let report = cleanup_duplicates(&config, &drive).await.unwrap();

    assert!(report.removed.is_empty());
    assert_eq!(drive.file_count(), 1);
    assert!(render_duplicates(&check_duplicates(&config, &drive).await.unwrap())
        .contains("No duplicate files"));
}
