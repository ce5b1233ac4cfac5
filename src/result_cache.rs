//! Process-wide cache of fully buffered query results
//!
//! The server marks a result set cacheable by returning a non-zero cache
//! offset together with the `(table id, timestamp)` pairs the rows were read
//! from. A cached entry is served again for the same
//! `(database guid, schema, sql, parameter count)` until one of those tables
//! changes. Timestamps are re-checked with the server at most once per
//! refresh interval.
//!
//! Capacity is a byte budget; the least recently used entry goes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::messages::{ColumnInfo, RawRow, TableTimestamp};

/// Rough per-column overhead charged against the budget
const COLUMN_COST: usize = 64;

/// Identity of a cached result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Database guid from login
    pub guid: String,
    /// Current schema
    pub schema: String,
    /// SQL text
    pub sql: String,
    /// Number of bound parameters
    pub param_count: usize,
}

/// A cached result set
#[derive(Debug, Clone)]
pub struct CachedResult {
    /// Column descriptors
    pub columns: Arc<[ColumnInfo]>,
    /// Every row of the result
    pub rows: Arc<[RawRow]>,
    /// Source tables and the timestamps the rows reflect
    pub tables: Vec<TableTimestamp>,
}

#[derive(Debug)]
struct CachedEntry {
    result: CachedResult,
    size: usize,
    checked_at: Instant,
    last_used: u64,
}

/// Outcome of a lookup
#[derive(Debug)]
pub enum Lookup {
    /// Nothing cached
    Miss,
    /// Cached and recently verified
    Hit(CachedResult),
    /// Cached, but the table timestamps must be checked first
    Verify(Vec<i32>),
}

/// LRU result cache bounded in bytes
#[derive(Debug)]
pub struct ResultCache {
    entries: IndexMap<CacheKey, CachedEntry>,
    capacity: usize,
    used: usize,
    refresh: Duration,
    tick: u64,
}

impl ResultCache {
    /// Create a cache holding up to `capacity` bytes
    ///
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize, refresh: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
            used: 0,
            refresh,
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `key`
    pub fn lookup(&mut self, key: &CacheKey) -> Lookup {
        let tick = self.next_tick();
        let refresh = self.refresh;
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::trace!(sql = %key.sql, "result cache miss");
            return Lookup::Miss;
        };
        if entry.checked_at.elapsed() >= refresh {
            return Lookup::Verify(entry.result.tables.iter().map(|t| t.table_id).collect());
        }
        entry.last_used = tick;
        tracing::trace!(sql = %key.sql, "result cache hit");
        Lookup::Hit(entry.result.clone())
    }

    /// Compare current server timestamps against the entry and serve or drop it
    pub fn confirm(&mut self, key: &CacheKey, current: &[TableTimestamp]) -> Option<CachedResult> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        let unchanged = entry.result.tables.len() == current.len()
            && entry
                .result
                .tables
                .iter()
                .all(|t| current.iter().any(|c| c.table_id == t.table_id && c.timestamp == t.timestamp));
        if !unchanged {
            tracing::debug!(sql = %key.sql, "result cache entry invalidated by table change");
            self.invalidate(key);
            return None;
        }
        entry.checked_at = Instant::now();
        entry.last_used = tick;
        Some(entry.result.clone())
    }

    /// Store a result
    pub fn put(&mut self, key: CacheKey, columns: Vec<ColumnInfo>, rows: Vec<RawRow>, tables: Vec<TableTimestamp>) {
        let size = rows.iter().map(RawRow::byte_size).sum::<usize>() + columns.len() * COLUMN_COST + key.sql.len();
        if size > self.capacity {
            tracing::trace!(sql = %key.sql, size, "result too large to cache");
            return;
        }
        self.invalidate(&key);
        while self.used + size > self.capacity && self.evict_lru() {}
        let tick = self.next_tick();
        self.used += size;
        self.entries.insert(
            key,
            CachedEntry {
                result: CachedResult {
                    columns: columns.into(),
                    rows: rows.into(),
                    tables,
                },
                size,
                checked_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    /// Drop the entry for `key`
    pub fn invalidate(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.swap_remove(key) {
            self.used -= entry.size;
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    /// Number of cached results
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes charged against the budget
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Byte budget
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_lru(&mut self) -> bool {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        match lru {
            Some(key) => {
                tracing::trace!(sql = %key.sql, "evicted result cache entry");
                self.invalidate(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::col_type;

    fn key(sql: &str) -> CacheKey {
        CacheKey {
            guid: "G".into(),
            schema: "SYSDBA".into(),
            sql: sql.into(),
            param_count: 0,
        }
    }

    fn rows(n: usize, width: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| RawRow {
                rowid: i as i64,
                cells: vec![Some(vec![b'x'; width])],
            })
            .collect()
    }

    fn ts(id: i32, at: i64) -> TableTimestamp {
        TableTimestamp {
            table_id: id,
            timestamp: at,
        }
    }

    fn cols() -> Vec<ColumnInfo> {
        vec![ColumnInfo::new("C", col_type::VARCHAR)]
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = ResultCache::new(1 << 20, Duration::from_secs(60));
        assert!(matches!(cache.lookup(&key("select 1")), Lookup::Miss));
        cache.put(key("select 1"), cols(), rows(2, 10), vec![ts(1, 100)]);
        match cache.lookup(&key("select 1")) {
            Lookup::Hit(r) => assert_eq!(r.rows.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        let mut other_schema = key("select 1");
        other_schema.schema = "OTHER".into();
        assert!(matches!(cache.lookup(&other_schema), Lookup::Miss));
    }

    #[test]
    fn test_verify_after_refresh_interval() {
        let mut cache = ResultCache::new(1 << 20, Duration::ZERO);
        cache.put(key("q"), cols(), rows(1, 4), vec![ts(7, 1)]);
        let Lookup::Verify(ids) = cache.lookup(&key("q")) else {
            panic!("expected verify");
        };
        assert_eq!(ids, vec![7]);
        assert!(cache.confirm(&key("q"), &[ts(7, 1)]).is_some());
        assert!(cache.confirm(&key("q"), &[ts(7, 2)]).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_lru_eviction_by_bytes() {
        let one = rows(1, 100).iter().map(RawRow::byte_size).sum::<usize>() + COLUMN_COST + 1;
        let mut cache = ResultCache::new(one * 2, Duration::from_secs(60));
        cache.put(key("a"), cols(), rows(1, 100), vec![]);
        cache.put(key("b"), cols(), rows(1, 100), vec![]);
        assert_eq!(cache.len(), 2);
        // touch "a" so "b" is the least recently used
        assert!(matches!(cache.lookup(&key("a")), Lookup::Hit(_)));
        cache.put(key("c"), cols(), rows(1, 100), vec![]);
        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.lookup(&key("b")), Lookup::Miss));
        assert!(matches!(cache.lookup(&key("a")), Lookup::Hit(_)));
        assert!(cache.used_bytes() <= cache.capacity());
    }

    #[test]
    fn test_oversized_and_disabled() {
        let mut cache = ResultCache::new(0, Duration::from_secs(1));
        cache.put(key("a"), cols(), rows(1, 1), vec![]);
        assert!(cache.is_empty());
    }
}
