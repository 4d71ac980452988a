//! Per-IP admission control: a concurrent-connection cap plus a one-second
//! request window with a burst allowance. Every accepted socket passes
//! through [`IpLimiter::admit`] before any HTTP work; rejected sockets are
//! closed without a response.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Idle seconds after which a connection entry with no live connections
/// is swept.
const CONN_ENTRY_IDLE_SECS: u64 = 60;
/// Idle seconds after which a rate entry is swept.
const RATE_ENTRY_IDLE_SECS: u64 = 300;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    #[error("per-ip connection limit exceeded")]
    ConnectionLimit,
    #[error("per-ip request rate exceeded")]
    RateLimit,
}

#[derive(Debug, Clone)]
pub struct LimitSettings {
    pub max_conn_per_ip: u32,
    pub rps_limit: u32,
    pub burst_limit: u32,
    pub cleanup_interval_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_conn_per_ip: 10,
            rps_limit: 10,
            burst_limit: 20,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug)]
struct ConnEntry {
    active: u32,
    last_seen: u64,
}

#[derive(Debug)]
struct RateEntry {
    window_start: u64,
    count_in_window: u32,
    burst_count: u32,
    last_req: u64,
}

/// The two admission maps live in independently sharded tables so the
/// connection path and the rate path never contend on one lock.
pub struct IpLimiter {
    settings: LimitSettings,
    connections: DashMap<IpAddr, ConnEntry>,
    rates: DashMap<IpAddr, RateEntry>,
    last_sweep: AtomicU64,
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl IpLimiter {
    pub fn new(settings: LimitSettings) -> Self {
        Self {
            settings,
            connections: DashMap::new(),
            rates: DashMap::new(),
            last_sweep: AtomicU64::new(0),
        }
    }

    /// Gate an accepted connection. On success the caller owes exactly one
    /// matching [`release`](Self::release) at connection destruction.
    pub fn admit(&self, ip: IpAddr) -> Result<(), AdmitError> {
        self.admit_at(ip, epoch_secs())
    }

    pub fn release(&self, ip: IpAddr) {
        self.release_at(ip, epoch_secs())
    }

    fn admit_at(&self, ip: IpAddr, now: u64) -> Result<(), AdmitError> {
        self.maybe_sweep(now);

        // Concurrent-connection cap.
        if self.settings.max_conn_per_ip > 0 {
            if let Some(entry) = self.connections.get(&ip) {
                if entry.active >= self.settings.max_conn_per_ip {
                    warn!(
                        target: "xserver::limit",
                        %ip,
                        active = entry.active,
                        limit = self.settings.max_conn_per_ip,
                        "Connection limit exceeded"
                    );
                    return Err(AdmitError::ConnectionLimit);
                }
            }
        }

        // Request-rate window with burst allowance.
        if self.settings.rps_limit > 0 {
            let mut rate = self.rates.entry(ip).or_insert_with(|| RateEntry {
                window_start: now,
                count_in_window: 0,
                burst_count: 0,
                last_req: now,
            });

            if now > rate.window_start {
                rate.count_in_window = 0;
                rate.window_start = now;
            }
            // Burst credit decays one per idle second.
            let idle = now.saturating_sub(rate.last_req);
            if idle > 0 {
                rate.burst_count = rate.burst_count.saturating_sub(idle.min(u64::from(u32::MAX)) as u32);
            }

            if rate.count_in_window >= self.settings.rps_limit {
                if rate.burst_count >= self.settings.burst_limit {
                    warn!(
                        target: "xserver::limit",
                        %ip,
                        rate = rate.count_in_window,
                        burst = rate.burst_count,
                        "Request rate exceeded"
                    );
                    return Err(AdmitError::RateLimit);
                }
                rate.burst_count += 1;
            }

            rate.count_in_window += 1;
            rate.last_req = now;
        }

        let mut conn = self.connections.entry(ip).or_insert_with(|| ConnEntry {
            active: 0,
            last_seen: now,
        });
        conn.active += 1;
        conn.last_seen = now;
        debug!(target: "xserver::limit", %ip, active = conn.active, "Connection admitted");
        Ok(())
    }

    fn release_at(&self, ip: IpAddr, now: u64) {
        if let Some(mut entry) = self.connections.get_mut(&ip) {
            entry.active = entry.active.saturating_sub(1);
            entry.last_seen = now;
            debug!(target: "xserver::limit", %ip, active = entry.active, "Connection released");
        }
    }

    /// Amortized housekeeping: at most once per cleanup interval, drop
    /// entries that have gone quiet.
    fn maybe_sweep(&self, now: u64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.settings.cleanup_interval_secs {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        self.connections.retain(|_, entry| {
            entry.active > 0 || now.saturating_sub(entry.last_seen) <= CONN_ENTRY_IDLE_SECS
        });
        self.rates
            .retain(|_, entry| now.saturating_sub(entry.last_req) <= RATE_ENTRY_IDLE_SECS);
        debug!(
            target: "xserver::limit",
            tracked_connections = self.connections.len(),
            tracked_rates = self.rates.len(),
            "Swept expired admission records"
        );
    }

    /// Live connection count currently accounted to `ip`.
    pub fn active_connections(&self, ip: IpAddr) -> u32 {
        self.connections.get(&ip).map(|e| e.active).unwrap_or(0)
    }

    /// Total live connections across all tracked IPs.
    pub fn total_active(&self) -> u64 {
        self.connections.iter().map(|e| u64::from(e.active)).sum()
    }

    pub fn tracked_ips(&self) -> usize {
        self.connections.len()
    }
}
