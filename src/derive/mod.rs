//! Derivation consumers: previews and waveforms kept in step with the store through its
//! change feed.

pub mod previews;
pub mod waveforms;

pub use previews::PreviewGenerator;
pub use waveforms::WaveformGenerator;

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, TryRecvError, select};
use log::{error, info};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::errors::StoreError;
use crate::store::DocumentStore;
use crate::types::MediaRecord;
use crate::utils::tempfiles::remove_if_exists;

/// Fresh-read attempts when writing an artifact patch back races another writer.
const WRITE_BACK_ATTEMPTS: usize = 3;

/// Per-record work driven by the change feed.
pub trait RecordHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called for every existing record at startup (`deleted = false`) and for every change.
    fn handle(&self, id: &str, deleted: bool);
}

/// Feed `handler` the id of every existing record, then live changes, on one thread,
/// until `shutdown` receives or disconnects. The subscription is opened before the backlog
/// is read so no change is missed.
pub fn spawn_consumer(
    store: Arc<dyn DocumentStore>,
    handler: Arc<dyn RecordHandler>,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>> {
    let live = store.subscribe();
    let backlog: Vec<String> = store.list_all()?.into_iter().map(|r| r.id).collect();
    let handle = std::thread::Builder::new()
        .name(format!("derive-{}", handler.name()))
        .spawn(move || {
            for id in &backlog {
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
                handler.handle(id, false);
            }
            info!("Queued all for {} validity check", handler.name());
            loop {
                select! {
                    recv(live) -> change => match change {
                        Ok(change) => handler.handle(&change.id, change.deleted),
                        Err(_) => break,
                    },
                    recv(shutdown) -> _ => break,
                }
            }
            info!("{} consumer stopped", handler.name());
        })?;
    Ok(handle)
}

/// Apply `patch` to a fresh read of `id` and store it, re-reading on revision conflicts.
/// `Ok(false)` when the record is gone.
pub fn write_back(
    store: &dyn DocumentStore,
    id: &str,
    patch: impl Fn(&mut MediaRecord),
) -> Result<bool> {
    for _ in 0..WRITE_BACK_ATTEMPTS {
        let Some(mut record) = store.get(id)? else {
            return Ok(false);
        };
        patch(&mut record);
        match store.put(&record, None) {
            Ok(_) => return Ok(true),
            Err(e) => match e.downcast_ref::<StoreError>() {
                Some(StoreError::Conflict { .. }) => continue,
                Some(StoreError::NotFound { .. }) => return Ok(false),
                None => return Err(e),
            },
        }
    }
    bail!("{id}: write back kept conflicting")
}

/// Remove a derived artifact; a missing file is fine.
pub(crate) fn delete_artifact(kind: &str, id: &str, path: &std::path::Path) {
    match remove_if_exists(path) {
        Ok(true) => info!("id={} Deleted {} {}", id, kind, path.display()),
        Ok(false) => {}
        Err(e) => error!("id={} {:#}", id, e),
    }
}
