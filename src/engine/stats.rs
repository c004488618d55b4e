// Live statistics: cache hit rates, network traffic, fallback and persist counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

struct StatsSample {
    at: Instant,
    network_bytes: u64,
    serve_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub network_bps: u64,
    pub serve_bps: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub opaque_fallbacks: u64,
    pub persist_failures: u64,
    pub cache_hit_rate: f64,
}

pub struct StatsCollector {
    network_bytes_total: AtomicU64,
    serve_bytes_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    opaque_fallbacks: AtomicU64,
    persist_failures: AtomicU64,
    last_sample: Mutex<StatsSample>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            network_bytes_total: AtomicU64::new(0),
            serve_bytes_total: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            opaque_fallbacks: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            last_sample: Mutex::new(StatsSample {
                at: Instant::now(),
                network_bytes: 0,
                serve_bytes: 0,
            }),
        }
    }

    pub fn record_network(&self, bytes: u64) {
        self.network_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: u64) {
        self.serve_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opaque_fallback(&self) {
        self.opaque_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (network_bps, serve_bps) = {
            // Totals must not be older than the last sample.
            let mut sample = self.last_sample.lock();
            let now = Instant::now();
            let current_network = self.network_bytes_total.load(Ordering::Relaxed);
            let current_serve = self.serve_bytes_total.load(Ordering::Relaxed);
            let elapsed = now.saturating_duration_since(sample.at).as_secs_f64();

            let rates = if elapsed > 0.1 {
                let n = (current_network.saturating_sub(sample.network_bytes) as f64 / elapsed)
                    as u64;
                let s = (current_serve.saturating_sub(sample.serve_bytes) as f64 / elapsed) as u64;
                (n, s)
            } else {
                (0, 0)
            };

            sample.at = now;
            sample.network_bytes = current_network;
            sample.serve_bytes = current_serve;

            rates
        };

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };

        StatsSnapshot {
            network_bps,
            serve_bps,
            cache_hits: hits,
            cache_misses: misses,
            opaque_fallbacks: self.opaque_fallbacks.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }

    pub fn total_network_bytes(&self) -> u64 {
        self.network_bytes_total.load(Ordering::Relaxed)
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
