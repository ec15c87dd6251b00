//! File-backed subscription store shared between processes.

use crate::error::{EngineError, Result};
use crate::types::{Clock, SystemClock};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::{LockableSubscriptionStore, SubscriptionCriteria, SubscriptionStore};
use crate::subscription::types::Subscription;

/// Magic bytes for the subscription file.
const SUBSCRIPTION_FILE_MAGIC: &[u8; 4] = b"SUB\0";

/// Current subscription file format version.
const SUBSCRIPTION_FILE_VERSION: u8 = 1;

/// Magic, version, payload length and checksum.
const SUBSCRIPTION_FILE_HEADER_LEN: u64 = 4 + 1 + 8 + 4;

/// How [`LockableSubscriptionStore::in_lock`] behaves when another process
/// holds the lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockMode {
    /// Block until the lock is free.
    #[default]
    Wait,
    /// Return [`EngineError::Locked`] immediately.
    FailFast,
}

/// Subscriptions persisted to a single file.
///
/// Every call re-reads the file, so several processes can point at the same
/// path. `in_lock` takes an advisory lock on `<path>.lock`.
pub struct FileSubscriptionStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_mode: LockMode,
    /// Serializes read-modify-write within this process.
    io_lock: Mutex<()>,
    clock: Box<dyn Clock>,
}

impl FileSubscriptionStore {
    /// Open the store at `path`, creating an empty file if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(path, SystemClock)
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: impl Clock + 'static) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");

        let store = Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_mode: LockMode::default(),
            io_lock: Mutex::new(()),
            clock: Box::new(clock),
        };

        if !store.path.exists() {
            store.write_all(&[])?;
        } else {
            // Fail early on a foreign or corrupt file.
            store.read_all()?;
        }

        Ok(store)
    }

    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every subscription from disk.
    fn read_all(&self) -> Result<Vec<Subscription>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // Magic
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SUBSCRIPTION_FILE_MAGIC {
            return Err(EngineError::InvalidFormat(
                "Invalid subscription file magic".into(),
            ));
        }

        // Version
        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SUBSCRIPTION_FILE_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported subscription file version: {}",
                version[0]
            )));
        }

        // Payload length and checksum
        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)?;
        let expected = u32::from_le_bytes(crc_bytes);

        let available = file
            .metadata()?
            .len()
            .saturating_sub(SUBSCRIPTION_FILE_HEADER_LEN);
        if len > available {
            return Err(EngineError::InvalidFormat(format!(
                "Subscription payload length {len} exceeds file size"
            )));
        }

        let mut encoded = vec![0u8; len as usize];
        file.read_exact(&mut encoded)?;

        let got = crc32fast::hash(&encoded);
        if got != expected {
            return Err(EngineError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }

    /// Replace the file contents. Writes a sibling temp file and renames it
    /// so readers never see a torn file.
    fn write_all(&self, subscriptions: &[Subscription]) -> Result<()> {
        let encoded = rmp_serde::to_vec(subscriptions)?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(SUBSCRIPTION_FILE_MAGIC)?;
            file.write_all(&[SUBSCRIPTION_FILE_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<Subscription>) -> Result<T>) -> Result<T> {
        let _guard = self.io_lock.lock();
        let mut subscriptions = self.read_all()?;
        let out = f(&mut subscriptions)?;
        self.write_all(&subscriptions)?;
        Ok(out)
    }
}

impl SubscriptionStore for FileSubscriptionStore {
    fn find(&self, criteria: &SubscriptionCriteria) -> Result<Vec<Subscription>> {
        let _guard = self.io_lock.lock();
        let mut subscriptions = self.read_all()?;
        subscriptions.retain(|s| criteria.matches(s));
        Ok(subscriptions)
    }

    fn add(&self, subscription: &mut Subscription) -> Result<()> {
        subscription.mark_saved(self.clock.now());
        self.modify(|subscriptions| {
            if subscriptions.iter().any(|s| s.id() == subscription.id()) {
                return Err(EngineError::SubscriptionExists(subscription.id().to_string()));
            }
            subscriptions.push(subscription.clone());
            Ok(())
        })
    }

    fn update(&self, subscription: &mut Subscription) -> Result<()> {
        subscription.mark_saved(self.clock.now());
        self.modify(|subscriptions| {
            let slot = subscriptions
                .iter_mut()
                .find(|s| s.id() == subscription.id())
                .ok_or_else(|| EngineError::SubscriptionNotFound(subscription.id().to_string()))?;
            *slot = subscription.clone();
            Ok(())
        })
    }

    fn remove(&self, subscription: &Subscription) -> Result<()> {
        self.modify(|subscriptions| {
            subscriptions.retain(|s| s.id() != subscription.id());
            Ok(())
        })
    }

    fn as_lockable(&self) -> Option<&dyn LockableSubscriptionStore> {
        Some(self)
    }
}

impl LockableSubscriptionStore for FileSubscriptionStore {
    fn in_lock(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;

        match self.lock_mode {
            LockMode::Wait => lock_file
                .lock_exclusive()
                .map_err(|e| EngineError::Lock(e.to_string()))?,
            LockMode::FailFast => lock_file
                .try_lock_exclusive()
                .map_err(|_| EngineError::Locked)?,
        }

        let result = f();

        // Closing the handle also drops the lock; unlock explicitly so an
        // unlock failure is visible.
        lock_file
            .unlock()
            .map_err(|e| EngineError::Lock(e.to_string()))?;

        result
    }
}
