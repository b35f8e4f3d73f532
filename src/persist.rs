//! C7: the write-behind persistence writer, grounded on
//! `original_source/src/hub/var.c`'s `Hub_Var_dbFlusher` thread.
//!
//! A `SET` on a persistent variable doesn't write to disk itself — it just
//! wakes this thread. The thread coalesces bursts of wakeups (a bounded,
//! capacity-1 channel: `try_send` drops extras) so a flurry of SETs costs
//! at most two flushes, not one per SET.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Local;
use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::vars::VarStore;

pub struct PersistWriter {
    wake_tx: Sender<()>,
    stop_tx: Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistWriter {
    pub fn spawn(db_path: PathBuf, store: Arc<VarStore>) -> PersistWriter {
        let (wake_tx, wake_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("persist-writer".to_string())
            .spawn(move || run(db_path, store, wake_rx, stop_rx))
            .expect("spawning persistence writer thread");

        PersistWriter { wake_tx, stop_tx, handle: Mutex::new(Some(handle)) }
    }

    /// Wake the writer to flush the current snapshot. Safe to call from any
    /// number of threads; a pending wakeup already queued makes this a
    /// no-op.
    pub fn mark_dirty(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Request one final flush, then join the writer thread.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

fn run(db_path: PathBuf, store: Arc<VarStore>, wake_rx: Receiver<()>, stop_rx: Receiver<()>) {
    loop {
        select! {
            recv(wake_rx) -> _ => {
                while wake_rx.try_recv().is_ok() {}
                if let Err(e) = flush(&db_path, &store) {
                    log::error!(target: "Hub", "failed to flush variable database to '{}': {:#}", db_path.display(), e);
                }
            }
            recv(stop_rx) -> _ => {
                if let Err(e) = flush(&db_path, &store) {
                    log::error!(target: "Hub", "failed to flush variable database to '{}' on shutdown: {:#}", db_path.display(), e);
                }
                break;
            }
        }
    }
}

/// Write the current persistent-variable snapshot to `path` atomically: a
/// sibling `.tmp` file is written and fsynced, then renamed over the
/// target, matching `Hub_Var_dbFlusher`'s tmp-then-rename sequence so a
/// crash mid-write never corrupts the live database.
fn flush(path: &Path, store: &VarStore) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut snapshot: Vec<(String, f64)> = store.persistent_snapshot().into_iter().collect();
    snapshot.sort_by(|a, b| a.0.cmp(&b.0));

    {
        let mut file = fs::File::create(&tmp_path)?;
        writeln!(file, "# {:<18} = {}", "Last updated", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        for (name, value) in &snapshot {
            writeln!(file, "{:<20} = {:.4}", name, value)?;
        }
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}
