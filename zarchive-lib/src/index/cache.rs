//! The single-writer LRU cache of zgram bodies. All access happens on the
//! coordinator task, so shared handles are plain `Arc`s.

use crate::error::{Error, ErrorKind};
use crate::logfiles::{read_record_at, LogLocation};
use crate::magic;
use crate::paths::ArchivePaths;
use crate::zgram::{LogRecord, Zgram, ZgramId};
use lru::LruCache;
use std::sync::Arc;

pub struct ZgramCache {
    cache: LruCache<ZgramId, Arc<Zgram>>,
}

impl std::fmt::Debug for ZgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZgramCache(len={})", self.cache.len())
    }
}

impl ZgramCache {
    pub fn new() -> ZgramCache {
        ZgramCache {
            cache: LruCache::new(magic::ZGRAM_CACHE_SIZE),
        }
    }

    /// Pre-warms the cache with a zgram we already hold (e.g. one just posted).
    pub fn insert(&mut self, zgram: Arc<Zgram>) {
        self.cache.put(zgram.id, zgram);
    }

    /// Returns a shared handle per locator, reading log files for misses.
    pub fn lookup_or_resolve(
        &mut self,
        paths: &ArchivePaths,
        locators: &[(ZgramId, LogLocation)],
    ) -> Result<Vec<Arc<Zgram>>, Error> {
        let mut result = Vec::with_capacity(locators.len());
        for (id, location) in locators {
            if let Some(zgram) = self.cache.get(id) {
                result.push(zgram.clone());
                continue;
            }
            let record = read_record_at(paths.log_dir(location.file_key.logged()), location)?;
            let zgram = match record {
                LogRecord::Zgram(zg) if zg.id == *id => Arc::new(zg),
                LogRecord::Zgram(zg) => {
                    return Err(ErrorKind::CorruptIndex(format!(
                        "location of zgram {id} holds zgram {}",
                        zg.id
                    ))
                    .into());
                }
                LogRecord::Metadata(_) => {
                    return Err(ErrorKind::CorruptIndex(format!(
                        "location of zgram {id} holds a metadata record"
                    ))
                    .into());
                }
            };
            self.cache.put(*id, zgram.clone());
            result.push(zgram);
        }
        Ok(result)
    }
}

impl Default for ZgramCache {
    fn default() -> Self {
        Self::new()
    }
}
