//! Durable-snapshot primitive shared by `indexer-core`, `merkle-engine`, and
//! `ledger-core`.
//!
//! Generalizes the append-log + bincode-snapshot pattern from the teacher's
//! `StatePersistence` (one `AtomicStore` + one `AppendLog` per table) to an
//! arbitrary `Serialize`-able state `T`. Each entity table in the pipeline
//! (block ledger rows, the NFT transfer log, ledger users/deposits/...) owns
//! one `Persisted<T>` keyed by its own tag so that stores don't share a
//! commit boundary unless a caller explicitly wants them to.

use atomic_store::{load_store::BincodeLoadStore, AppendLog, AtomicStore, AtomicStoreLoader};
use serde::{de::DeserializeOwned, Serialize};
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

#[derive(Debug, Snafu)]
pub enum PersistenceError {
    #[snafu(display("failed to open persisted store at {}: {}", path.display(), source))]
    Open {
        path: PathBuf,
        source: atomic_store::PersistenceError,
    },
    #[snafu(display("failed to commit persisted state: {}", source))]
    Commit {
        source: atomic_store::PersistenceError,
    },
    #[snafu(display("failed to load persisted state: {}", source))]
    Load {
        source: atomic_store::PersistenceError,
    },
}

/// A single durable table: an `AtomicStore`-backed append log that always
/// keeps the latest snapshot of `T` plus a bounded history of prior
/// snapshots (used only for crash recovery, never read back by callers).
pub struct Persisted<T: Serialize + DeserializeOwned + Default + Clone> {
    store: AtomicStore,
    log: AppendLog<BincodeLoadStore<T>>,
}

impl<T: Serialize + DeserializeOwned + Default + Clone> Persisted<T> {
    /// Create a brand-new store at `base_path/<key_tag>`, discarding any
    /// prior history. Mirrors the teacher's `--reset-store-state` flag.
    pub fn create(base_path: &Path, key_tag: &str) -> Result<Self, PersistenceError> {
        let path = base_path.join(key_tag);
        let mut loader =
            AtomicStoreLoader::create(&path, key_tag).context(OpenSnafu { path: path.clone() })?;
        let log = AppendLog::create(&mut loader, Default::default(), key_tag, 1024)
            .context(OpenSnafu { path: path.clone() })?;
        let store = AtomicStore::open(loader).context(OpenSnafu { path })?;
        Ok(Persisted { store, log })
    }

    /// Re-open a store created by a prior run, resuming from its last
    /// committed snapshot.
    pub fn load(base_path: &Path, key_tag: &str) -> Result<Self, PersistenceError> {
        let path = base_path.join(key_tag);
        let mut loader =
            AtomicStoreLoader::load(&path, key_tag).context(OpenSnafu { path: path.clone() })?;
        let log = AppendLog::load(&mut loader, Default::default(), key_tag, 1024)
            .context(OpenSnafu { path: path.clone() })?;
        let store = AtomicStore::open(loader).context(OpenSnafu { path })?;
        Ok(Persisted { store, log })
    }

    /// Open an existing store, or create one if this is the first run.
    pub fn open_or_create(base_path: &Path, key_tag: &str) -> Result<Self, PersistenceError> {
        match Self::load(base_path, key_tag) {
            Ok(persisted) => Ok(persisted),
            Err(_) => Self::create(base_path, key_tag),
        }
    }

    /// Commit a new snapshot of the full state. The caller owns the
    /// in-memory representation; this simply durably records it.
    pub fn commit(&mut self, state: &T) -> Result<(), PersistenceError> {
        self.log.store_resource(state).context(CommitSnafu)?;
        self.log.commit_version().context(CommitSnafu)?;
        self.store.commit_version().context(CommitSnafu)?;
        Ok(())
    }

    /// Load the most recently committed snapshot. A freshly `create`d store
    /// has never been committed to, so callers that open via `create`
    /// should seed state themselves rather than calling this first; `load`
    /// and `open_or_create` are for resuming a store that was committed to
    /// by a prior run.
    pub fn load_latest(&self) -> Result<T, PersistenceError> {
        self.log.load_latest().context(LoadSnafu)
    }
}
