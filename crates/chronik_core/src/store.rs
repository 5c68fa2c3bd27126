//! Store locations and their locking.
//!
//! A `:file` store is a directory:
//!
//! ```text
//! <path>/
//! ├─ LOG    # frame log: header frame, then one frame per transaction
//! └─ LOCK   # advisory lock: shared for readers, exclusive for writers
//! ```
//!
//! `:memory` stores live in a process-wide registry keyed by id, each
//! guarded by its own `RwLock`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chronik_storage::{FileBackend, FrameLog, InMemoryBackend, StorageBackend};
use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::config::Backend;
use crate::error::{CoreError, CoreResult};

const LOG_FILE: &str = "LOG";
const LOCK_FILE: &str = "LOCK";

/// Frame log over whichever backend a store uses.
pub(crate) type StoreLog = FrameLog<Box<dyn StorageBackend>>;

#[derive(Clone)]
pub(crate) struct MemoryStore {
    backend: InMemoryBackend,
    lock: Arc<RwLock<()>>,
}

static MEMORY_STORES: Lazy<Mutex<HashMap<String, MemoryStore>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// An opened store.
#[derive(Clone)]
pub(crate) enum Store {
    Memory { id: String, inner: MemoryStore },
    File { dir: PathBuf },
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Store::Memory { id, .. } => write!(f, "Store::Memory({id})"),
            Store::File { dir } => write!(f, "Store::File({})", dir.display()),
        }
    }
}

fn open_lock(dir: &Path) -> CoreResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))?)
}

fn try_lock(dir: &Path) -> CoreResult<File> {
    let lock = open_lock(dir)?;
    if lock.try_lock_exclusive().is_err() {
        return Err(CoreError::DatabaseLocked);
    }
    Ok(lock)
}

fn log_exists(dir: &Path) -> bool {
    dir.join(LOG_FILE)
        .metadata()
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

impl Store {
    /// Whether a store exists at `backend`.
    pub(crate) fn exists(backend: &Backend) -> bool {
        match backend {
            Backend::Memory { id } => MEMORY_STORES.lock().contains_key(id),
            Backend::File { path } => log_exists(path),
        }
    }

    /// Creates a store whose log starts with `header`.
    pub(crate) fn create(backend: &Backend, header: &[u8]) -> CoreResult<()> {
        match backend {
            Backend::Memory { id } => {
                let mut stores = MEMORY_STORES.lock();
                if stores.contains_key(id) {
                    return Err(CoreError::DatabaseExists {
                        store: backend.to_string(),
                    });
                }
                let memory = InMemoryBackend::new();
                FrameLog::new(memory.clone()).append_frame(header)?;
                stores.insert(
                    id.clone(),
                    MemoryStore {
                        backend: memory,
                        lock: Arc::new(RwLock::new(())),
                    },
                );
                Ok(())
            }
            Backend::File { path } => {
                fs::create_dir_all(path)?;
                let _lock = try_lock(path)?;
                if log_exists(path) {
                    return Err(CoreError::DatabaseExists {
                        store: backend.to_string(),
                    });
                }
                let mut log = FrameLog::new(FileBackend::open(&path.join(LOG_FILE))?);
                log.rewrite(&[header])?;
                Ok(())
            }
        }
    }

    /// Removes the store at `backend`, returning whether one existed.
    pub(crate) fn delete(backend: &Backend) -> CoreResult<bool> {
        match backend {
            Backend::Memory { id } => Ok(MEMORY_STORES.lock().remove(id).is_some()),
            Backend::File { path } => {
                if !path.is_dir() {
                    return Ok(false);
                }
                let existed = log_exists(path);
                {
                    let _lock = try_lock(path)?;
                    let log = path.join(LOG_FILE);
                    if log.exists() {
                        fs::remove_file(log)?;
                    }
                }
                fs::remove_file(path.join(LOCK_FILE))?;
                // The directory may hold unrelated files; leave it then.
                let _ = fs::remove_dir(path);
                Ok(existed)
            }
        }
    }

    /// Opens the store at `backend`.
    pub(crate) fn open(backend: &Backend) -> CoreResult<Self> {
        let missing = || CoreError::DatabaseNotFound {
            store: backend.to_string(),
        };
        match backend {
            Backend::Memory { id } => {
                let inner = MEMORY_STORES.lock().get(id).cloned().ok_or_else(missing)?;
                Ok(Store::Memory {
                    id: id.clone(),
                    inner,
                })
            }
            Backend::File { path } => {
                if !log_exists(path) {
                    return Err(missing());
                }
                Ok(Store::File { dir: path.clone() })
            }
        }
    }

    /// Reads every frame together with the log size.
    pub(crate) fn read(&self) -> CoreResult<(Vec<Vec<u8>>, u64)> {
        match self {
            Store::Memory { inner, .. } => {
                let _guard = inner.lock.read();
                let log = FrameLog::new(inner.backend.clone());
                Ok((log.read_frames()?, log.backend().size()?))
            }
            Store::File { dir } => {
                let lock = open_lock(dir)?;
                lock.lock_shared()?;
                let log = FrameLog::new(FileBackend::open_existing(&dir.join(LOG_FILE))?);
                let result = (log.read_frames()?, log.backend().size()?);
                lock.unlock()?;
                Ok(result)
            }
        }
    }

    /// Runs `f` with exclusive write access to the log.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut StoreLog) -> CoreResult<T>) -> CoreResult<T> {
        match self {
            Store::Memory { inner, .. } => {
                let _guard = inner.lock.write();
                let backend: Box<dyn StorageBackend> = Box::new(inner.backend.clone());
                let mut log = FrameLog::new(backend);
                f(&mut log)
            }
            Store::File { dir } => {
                let lock = open_lock(dir)?;
                lock.lock_exclusive()?;
                let backend: Box<dyn StorageBackend> =
                    Box::new(FileBackend::open_existing(&dir.join(LOG_FILE))?);
                let mut log = FrameLog::new(backend);
                if log.repair_tail()? {
                    tracing::warn!(dir = %dir.display(), "truncated torn frame at log tail");
                }
                let result = f(&mut log);
                if result.is_ok() {
                    log.sync()?;
                }
                lock.unlock()?;
                result
            }
        }
    }
}
