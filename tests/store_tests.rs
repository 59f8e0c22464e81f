//! Document store: revisions, attachments, paging, change feed.

use mediascan::derive::write_back;
use mediascan::errors::StoreError;
use mediascan::store::{DocumentStore, SqliteStore};
use mediascan::types::{Attachment, MediaRecord};
use mediascan::utils::THUMBNAIL_ATTACHMENT;
use std::time::Duration;

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn record(id: &str, size: u64) -> MediaRecord {
    let mut r = MediaRecord::new(id);
    r.media_size = Some(size);
    r
}

#[test]
fn test_put_assigns_revisions_and_get_returns_them() {
    let s = store();
    assert!(s.get("A").unwrap().is_none());
    let first = s.put(&record("A", 1), None).unwrap();
    let rev1 = first.rev.clone().unwrap();
    assert!(rev1.starts_with("1-"));

    let mut next = s.get("A").unwrap().unwrap();
    assert_eq!(next.rev.as_deref(), Some(rev1.as_str()));
    next.media_size = Some(2);
    let second = s.put(&next, None).unwrap();
    assert!(second.rev.unwrap().starts_with("2-"));
    assert_eq!(s.get("A").unwrap().unwrap().media_size, Some(2));
}

#[test]
fn test_stale_revision_is_a_conflict() {
    let s = store();
    let stored = s.put(&record("A", 1), None).unwrap();
    s.put(&stored, None).unwrap();

    let err = s.put(&stored, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Conflict { .. })
    ));
    // New document written without a revision over an existing one.
    assert!(s.put(&record("A", 9), None).is_err());
}

#[test]
fn test_update_of_deleted_document_is_not_found() {
    let s = store();
    let stored = s.put(&record("A", 1), None).unwrap();
    assert!(s.remove("A").unwrap());

    let err = s.put(&stored, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::NotFound { id }) if id == "A"
    ));
    assert!(s.get("A").unwrap().is_none());
}

#[test]
fn test_attachment_replaced_and_removed_with_document() {
    let s = store();
    let stored = s
        .put(&record("A", 1), Some(&Attachment::thumbnail(vec![1, 2, 3])))
        .unwrap();
    let att = s.attachment("A", THUMBNAIL_ATTACHMENT).unwrap().unwrap();
    assert_eq!(att.data, vec![1, 2, 3]);
    assert_eq!(att.content_type, "image/png");

    let digest = s.attachment_digest("A", THUMBNAIL_ATTACHMENT).unwrap().unwrap();
    assert_eq!(digest, blake3::hash(&[1, 2, 3]).to_hex().to_string());

    // A write without an attachment keeps the existing one.
    let stored = s.put(&stored, None).unwrap();
    assert!(s.attachment("A", THUMBNAIL_ATTACHMENT).unwrap().is_some());
    s.put(&stored, Some(&Attachment::thumbnail(vec![9]))).unwrap();
    assert_eq!(
        s.attachment("A", THUMBNAIL_ATTACHMENT).unwrap().unwrap().data,
        vec![9]
    );

    assert!(s.remove("A").unwrap());
    assert!(!s.remove("A").unwrap());
    assert!(s.attachment("A", THUMBNAIL_ATTACHMENT).unwrap().is_none());
}

#[test]
fn test_bulk_delete_skips_stale_revisions() {
    let s = store();
    let a = s.put(&record("A", 1), None).unwrap();
    let b = s.put(&record("B", 1), None).unwrap();
    s.put(&b, None).unwrap();

    let deleted = s
        .bulk_delete(&[
            ("A".to_string(), a.rev.clone()),
            ("B".to_string(), b.rev.clone()),
            ("MISSING".to_string(), None),
        ])
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(s.get("A").unwrap().is_none());
    assert!(s.get("B").unwrap().is_some());
}

#[test]
fn test_pages_are_ordered_by_id_and_list_all_spans_pages() {
    let s = store();
    for i in (0..300).rev() {
        s.put(&record(&format!("ID{i:04}"), i), None).unwrap();
    }
    let page = s.list_page(None, 3).unwrap();
    let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["ID0000", "ID0001", "ID0002"]);
    let next = s.list_page(Some("ID0002"), 2).unwrap();
    assert_eq!(next[0].id, "ID0003");

    let all = s.list_all().unwrap();
    assert_eq!(all.len(), 300);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn test_change_feed_and_update_seq() {
    let s = store();
    assert_eq!(s.update_seq().unwrap(), 0);
    s.put(&record("OLD", 1), None).unwrap();

    let feed = s.subscribe();
    let a = s.put(&record("A", 1), None).unwrap();
    s.remove("OLD").unwrap();

    let first = feed.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first.id, "A");
    assert!(!first.deleted);
    assert_eq!(first.doc.unwrap().rev, a.rev);
    let second = feed.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.id, "OLD");
    assert!(second.deleted);
    assert!(second.doc.is_none());
    assert!(second.seq > first.seq);
    assert_eq!(s.update_seq().unwrap(), second.seq);
    assert!(feed.try_recv().is_err());
}

#[test]
fn test_write_back_patches_fresh_copy() {
    let s = store();
    s.put(&record("A", 1), None).unwrap();
    assert!(write_back(&s, "A", |r| r.preview_size = Some(42)).unwrap());
    let stored = s.get("A").unwrap().unwrap();
    assert_eq!(stored.preview_size, Some(42));
    assert_eq!(stored.media_size, Some(1));
    assert!(!write_back(&s, "NOPE", |r| r.preview_size = Some(1)).unwrap());
}
