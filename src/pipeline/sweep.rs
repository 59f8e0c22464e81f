//! Dead-media sweep: drop records whose file is gone or lives outside the media root.

use anyhow::Result;
use log::info;
use std::path::Path;

use crate::store::DocumentStore;
use crate::types::MediaRecord;
use crate::utils::config::DEAD_MEDIA_PAGE_SIZE;

fn is_dead(record: &MediaRecord, root: &Path) -> bool {
    match &record.media_path {
        Some(p) => !p.starts_with(root) || !p.exists(),
        None => true,
    }
}

/// Page through every record and bulk-delete dead ones page by page. Returns the number removed.
pub fn clean_deleted(store: &dyn DocumentStore, root: &Path) -> Result<usize> {
    info!("Checking for dead media");
    let mut removed = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_page(cursor.as_deref(), DEAD_MEDIA_PAGE_SIZE)?;
        let dead: Vec<(String, Option<String>)> = page
            .iter()
            .filter(|r| is_dead(r, root))
            .map(|r| (r.id.clone(), r.rev.clone()))
            .collect();
        if !dead.is_empty() {
            removed += store.bulk_delete(&dead)?;
        }
        if page.len() < DEAD_MEDIA_PAGE_SIZE {
            break;
        }
        cursor = page.last().map(|r| r.id.clone());
    }
    info!("Finished check for dead media ({} removed)", removed);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn removes_missing_and_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let live = root.join("live.mov");
        std::fs::write(&live, b"x").unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        for (id, path) in [
            ("LIVE", live.clone()),
            ("GONE", root.join("gone.mov")),
            ("OUTSIDE", std::path::PathBuf::from("/elsewhere/x.mov")),
        ] {
            let mut r = MediaRecord::new(id);
            r.media_path = Some(path);
            store.put(&r, None).unwrap();
        }

        assert_eq!(clean_deleted(&store, &root).unwrap(), 2);
        let left: Vec<String> = store.list_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec!["LIVE".to_string()]);
    }
}
