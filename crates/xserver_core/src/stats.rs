//! Worker statistics: atomic counters updated on the hot path, snapshotted
//! as JSON for the loopback status endpoint and the maintenance-tick log.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct WorkerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    active: AtomicU64,
    requests: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    dispatch_micros_total: AtomicU64,
    dispatch_micros_max: AtomicU64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub active: u64,
    pub requests: u64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub avg_dispatch_micros: u64,
    pub max_dispatch_micros: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_resident_bytes: u64,
    pub tracked_ips: u64,
}

impl WorkerStats {
    pub fn connection_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn record_request(&self, status: u16, micros: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => self.status_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.status_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => self.status_5xx.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        self.dispatch_micros_total.fetch_add(micros, Ordering::Relaxed);
        self.dispatch_micros_max.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        cache: &xserver_cache::FileCache,
        limiter: &xserver_limit::IpLimiter,
    ) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let total = self.dispatch_micros_total.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            requests,
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            avg_dispatch_micros: if requests > 0 { total / requests } else { 0 },
            max_dispatch_micros: self.dispatch_micros_max.load(Ordering::Relaxed),
            cache_hits: cache.hit_count(),
            cache_misses: cache.miss_count(),
            cache_resident_bytes: cache.resident_bytes(),
            tracked_ips: limiter.tracked_ips() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_classify() {
        let stats = WorkerStats::default();
        stats.connection_accepted();
        stats.connection_opened();
        stats.record_request(200, 10);
        stats.record_request(404, 30);
        stats.record_request(502, 20);
        stats.connection_closed();

        let cache = xserver_cache::FileCache::new(1, 1, 1);
        let limiter = xserver_limit::IpLimiter::new(Default::default());
        let snap = stats.snapshot(&cache, &limiter);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.status_2xx, 1);
        assert_eq!(snap.status_4xx, 1);
        assert_eq!(snap.status_5xx, 1);
        assert_eq!(snap.avg_dispatch_micros, 20);
        assert_eq!(snap.max_dispatch_micros, 30);
        assert_eq!(snap.active, 0);
    }

    #[test]
    fn active_gauge_never_underflows() {
        let stats = WorkerStats::default();
        stats.connection_closed();
        assert_eq!(stats.active_connections(), 0);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = WorkerStats::default();
        let cache = xserver_cache::FileCache::new(1, 1, 1);
        let limiter = xserver_limit::IpLimiter::new(Default::default());
        let json = serde_json::to_string(&stats.snapshot(&cache, &limiter)).unwrap();
        assert!(json.contains("\"requests\":0"));
        assert!(json.contains("\"cache_hits\":0"));
    }
}
