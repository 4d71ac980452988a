//! Bounded in-memory file cache.
//!
//! A sharded map of path → entry with a per-file size cap and a global
//! resident-bytes cap. Readers borrow entry bytes through an [`Arc`]; the
//! Arc count is the reader ref-count, so evicting an entry only detaches it
//! from the map; the bytes are freed when the last borrow drops, never
//! under a live reader. A background sweeper evicts entries that have not
//! been touched within the idle horizon.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::{debug, info};

#[derive(Debug)]
struct Entry {
    bytes: Arc<[u8]>,
    size: u64,
    mtime: SystemTime,
    last_access: AtomicU64,
    valid: AtomicBool,
}

/// A borrowed cache hit. Holding one keeps the bytes alive across any
/// concurrent eviction.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub bytes: Arc<[u8]>,
    pub mtime: SystemTime,
}

pub struct FileCache {
    entries: DashMap<PathBuf, Entry>,
    max_file_bytes: u64,
    max_total_bytes: u64,
    idle_expiry_secs: u64,
    resident_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl FileCache {
    pub fn new(max_file_bytes: u64, max_total_bytes: u64, idle_expiry_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            max_file_bytes,
            max_total_bytes,
            idle_expiry_secs,
            resident_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `path`, revalidating against the file's current mtime.
    /// A stale entry is dropped and reported as a miss.
    pub fn get(&self, path: &Path, mtime: SystemTime) -> Option<CachedFile> {
        let stale = {
            match self.entries.get(path) {
                Some(entry) => {
                    if entry.valid.load(Ordering::Acquire) && entry.mtime == mtime {
                        entry.last_access.store(epoch_secs(), Ordering::Relaxed);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(CachedFile {
                            bytes: Arc::clone(&entry.bytes),
                            mtime: entry.mtime,
                        });
                    }
                    true
                }
                None => false,
            }
        };
        if stale {
            self.invalidate(path);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert `bytes` for `path`. Refused (returning `false`) when the file
    /// exceeds the per-file cap or the global cap has no room. An existing
    /// entry for the same path is replaced and its bytes released.
    pub fn put(&self, path: &Path, bytes: Vec<u8>, mtime: SystemTime) -> bool {
        let size = bytes.len() as u64;
        if self.max_file_bytes == 0 || size > self.max_file_bytes {
            return false;
        }

        // Make room for an overwrite before judging the global cap.
        self.invalidate(path);

        let resident = self.resident_bytes.load(Ordering::Relaxed);
        if resident.saturating_add(size) > self.max_total_bytes {
            debug!(
                target: "xserver::cache",
                path = %path.display(),
                size,
                resident,
                "Cache insert refused: global cap reached"
            );
            return false;
        }

        let entry = Entry {
            bytes: Arc::from(bytes),
            size,
            mtime,
            last_access: AtomicU64::new(epoch_secs()),
            valid: AtomicBool::new(true),
        };
        self.resident_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = self.entries.insert(path.to_path_buf(), entry) {
            // A racing insert for the same path slipped between the
            // invalidate and this insert; retire the loser.
            old.valid.store(false, Ordering::Release);
            self.resident_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        debug!(target: "xserver::cache", path = %path.display(), size, "Cached file");
        true
    }

    /// Detach `path` from the map. Outstanding borrows keep the bytes
    /// alive; the entry is flagged invalid for anyone still holding it.
    pub fn invalidate(&self, path: &Path) {
        if let Some((_, entry)) = self.entries.remove(path) {
            entry.valid.store(false, Ordering::Release);
            self.resident_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.valid.store(false, Ordering::Release);
            self.resident_bytes.fetch_sub(entry.size, Ordering::Relaxed);
            false
        });
    }

    /// Evict entries idle past the expiry horizon.
    pub fn sweep(&self) {
        let now = epoch_secs();
        let horizon = self.idle_expiry_secs;
        let mut evicted = 0usize;
        self.entries.retain(|_, entry| {
            let idle = now.saturating_sub(entry.last_access.load(Ordering::Relaxed));
            if idle > horizon {
                entry.valid.store(false, Ordering::Release);
                self.resident_bytes.fetch_sub(entry.size, Ordering::Relaxed);
                evicted += 1;
                false
            } else {
                true
            }
        });
        if evicted > 0 {
            info!(
                target: "xserver::cache",
                evicted,
                resident = self.resident_bytes.load(Ordering::Relaxed),
                "Cache sweep evicted idle entries"
            );
        }
    }

    /// Run [`sweep`](Self::sweep) forever on its own task.
    pub fn spawn_sweeper(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes.load(Ordering::Relaxed)
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mtime(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn last_insert_wins_for_a_path() {
        let cache = FileCache::new(1024, 4096, 3600);
        let path = Path::new("/site/a.html");
        assert!(cache.put(path, b"first".to_vec(), mtime(1)));
        assert!(cache.put(path, b"second".to_vec(), mtime(1)));
        let hit = cache.get(path, mtime(1)).expect("hit");
        assert_eq!(&*hit.bytes, b"second");
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.resident_bytes(), 6);
    }

    #[test]
    fn borrow_survives_eviction() {
        let cache = FileCache::new(1024, 4096, 3600);
        let path = Path::new("/site/b.html");
        cache.put(path, b"payload".to_vec(), mtime(1));
        let borrow = cache.get(path, mtime(1)).expect("hit");

        cache.invalidate(path);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.resident_bytes(), 0);
        // The borrowed bytes are still intact.
        assert_eq!(&*borrow.bytes, b"payload");
    }

    #[test]
    fn mtime_change_invalidates() {
        let cache = FileCache::new(1024, 4096, 3600);
        let path = Path::new("/site/c.html");
        cache.put(path, b"old".to_vec(), mtime(1));
        assert!(cache.get(path, mtime(2)).is_none(), "stale mtime must miss");
        assert_eq!(cache.entry_count(), 0, "stale entry is dropped");
    }

    #[test]
    fn per_file_cap_refuses_large_entries() {
        let cache = FileCache::new(4, 4096, 3600);
        assert!(!cache.put(Path::new("/big"), b"12345".to_vec(), mtime(1)));
        assert!(cache.put(Path::new("/ok"), b"1234".to_vec(), mtime(1)));
    }

    #[test]
    fn global_cap_refuses_when_full() {
        let cache = FileCache::new(8, 10, 3600);
        assert!(cache.put(Path::new("/a"), b"12345678".to_vec(), mtime(1)));
        assert!(!cache.put(Path::new("/b"), b"123".to_vec(), mtime(1)));
        // Overwriting the resident entry still works because its bytes are
        // released first.
        assert!(cache.put(Path::new("/a"), b"1".to_vec(), mtime(1)));
        assert_eq!(cache.resident_bytes(), 1);
    }

    #[test]
    fn hit_and_miss_counters_track_lookups() {
        let cache = FileCache::new(64, 1024, 3600);
        let path = Path::new("/x");
        assert!(cache.get(path, mtime(1)).is_none());
        cache.put(path, b"x".to_vec(), mtime(1));
        assert!(cache.get(path, mtime(1)).is_some());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let cache = FileCache::new(64, 1024, 3600);
        cache.put(Path::new("/a"), b"aa".to_vec(), mtime(1));
        cache.put(Path::new("/b"), b"bb".to_vec(), mtime(1));
        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.resident_bytes(), 0);
    }

    #[test]
    fn sweep_honors_idle_horizon() {
        let cache = FileCache::new(64, 1024, 0);
        cache.put(Path::new("/a"), b"aa".to_vec(), mtime(1));
        // Horizon of zero: anything idle for more than zero seconds goes.
        // A fresh entry has idle == 0 and stays.
        cache.sweep();
        assert_eq!(cache.entry_count(), 1);
    }
}
