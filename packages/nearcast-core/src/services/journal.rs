//! Durable commit log for broadcaster state.
//!
//! The store calls [`BroadcastJournal::commit`] with the complete draft state
//! of one broadcaster; only when it returns `Ok` does the draft become
//! visible. Two implementations exist:
//!
//! - [`MemoryJournal`]: keeps the last committed state in memory
//! - [`JsonFileJournal`]: one JSON file per broadcaster, written atomically

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{NearcastError, NearcastResult};
use crate::protocol_constants::BROADCAST_JOURNAL_DIR;
use crate::services::broadcast_store::BroadcasterState;
use crate::types::UserId;

/// Durable storage for broadcaster state.
#[async_trait]
pub trait BroadcastJournal: Send + Sync {
    /// Durably records the full state of one broadcaster.
    async fn commit(&self, state: &BroadcasterState) -> NearcastResult<()>;

    /// Loads every committed broadcaster state.
    fn load_all(&self) -> NearcastResult<Vec<BroadcasterState>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory journal
// ─────────────────────────────────────────────────────────────────────────────

/// Journal that keeps committed state in process memory only.
#[derive(Default)]
pub struct MemoryJournal {
    committed: DashMap<UserId, BroadcasterState>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed state for a sender.
    pub fn get(&self, sender_id: UserId) -> Option<BroadcasterState> {
        self.committed.get(&sender_id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl BroadcastJournal for MemoryJournal {
    async fn commit(&self, state: &BroadcasterState) -> NearcastResult<()> {
        self.committed.insert(state.record.sender_id, state.clone());
        Ok(())
    }

    fn load_all(&self) -> NearcastResult<Vec<BroadcasterState>> {
        Ok(self.committed.iter().map(|r| r.value().clone()).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON file journal
// ─────────────────────────────────────────────────────────────────────────────

/// Journal storing `broadcasts/<sender_id>.json` under a data directory.
///
/// Writes go to a temp file that is then renamed over the target, so a crash
/// leaves either the old or the new state on disk. Writes for one sender are
/// serialized by the store's per-broadcaster lock.
pub struct JsonFileJournal {
    dir: PathBuf,
}

impl JsonFileJournal {
    /// Opens (and creates if needed) the journal directory under `data_dir`.
    pub fn open(data_dir: &Path) -> NearcastResult<Self> {
        let dir = data_dir.join(BROADCAST_JOURNAL_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| {
            NearcastError::Configuration(format!(
                "cannot create journal directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        log::info!("[Journal] Using {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, sender_id: UserId) -> PathBuf {
        self.dir.join(format!("{}.json", sender_id))
    }

    /// Writes `contents` to a synced temp file, then renames it over `path`.
    fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let temp_path = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, path)
    }
}

#[async_trait]
impl BroadcastJournal for JsonFileJournal {
    async fn commit(&self, state: &BroadcasterState) -> NearcastResult<()> {
        let path = self.path_for(state.record.sender_id);
        let contents = serde_json::to_vec_pretty(state)?;

        tokio::task::spawn_blocking(move || Self::write_atomic(&path, &contents))
            .await
            .map_err(|e| NearcastError::Internal(format!("journal write task failed: {}", e)))??;
        Ok(())
    }

    fn load_all(&self) -> NearcastResult<Vec<BroadcasterState>> {
        let mut states = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(NearcastError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<BroadcasterState>(&bytes)?));
            match parsed {
                Ok(state) => states.push(state),
                Err(e) => {
                    log::warn!("[Journal] Skipping unreadable {}: {}", path.display(), e);
                }
            }
        }
        log::info!("[Journal] Loaded {} broadcaster(s)", states.len());
        Ok(states)
    }
}
