//! Jitter-adaptive pinned ring buffer for zero-copy streaming acquisition.
//!
//! `StreamingArena` embeds a [`GenericArena`] rather than extending it; the
//! ring's index arithmetic is lock-free (atomic fetch-and-add on
//! `write_index`/`read_index`, atomic `slot_count` for the modulus) while
//! the header/payload storage itself is protected by a reader-writer lock.
//! Never collapse these into a single mutex — that would serialize the
//! producer/consumer hot path behind ring expansion.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::warn;

use crate::arena::{Arena, ArenaTelemetry};
use crate::config::Config;
use crate::pinned::{PinnedAllocation, PinnedBackend};

const THROUGHPUT_WINDOW: Duration = Duration::from_millis(1000);
const EXPANSION_COOLDOWN: Duration = Duration::from_secs(1);

struct RingState {
    headers: Vec<Vec<u8>>,
    payloads: Vec<PinnedAllocation>,
}

pub struct StreamingArena {
    inner: GenericArenaHandle,
    backend: Box<dyn PinnedBackend>,
    ring: RwLock<RingState>,
    header_size: AtomicUsize,
    payload_size: AtomicUsize,
    slot_count: AtomicU64,
    write_index: AtomicU64,
    read_index: AtomicU64,
    total_bytes_processed: AtomicU64,
    avg_throughput_gbs: Mutex<f64>,
    last_adapt_time: Mutex<Instant>,
    last_throughput_check: Mutex<Instant>,
}

/// The embedded `GenericArena`, wrapped to keep imports local to this module.
type GenericArenaHandle = crate::generic_arena::GenericArena;

impl StreamingArena {
    pub fn new(config: Config, backend: Box<dyn PinnedBackend>) -> Self {
        let gpu_direct = config.gpu_direct_preferred;
        let _ = gpu_direct; // backend is already resolved by the builder
        Self {
            inner: GenericArenaHandle::new(config),
            backend,
            ring: RwLock::new(RingState {
                headers: Vec::new(),
                payloads: Vec::new(),
            }),
            header_size: AtomicUsize::new(0),
            payload_size: AtomicUsize::new(0),
            slot_count: AtomicU64::new(0),
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
            total_bytes_processed: AtomicU64::new(0),
            avg_throughput_gbs: Mutex::new(0.0),
            last_adapt_time: Mutex::new(Instant::now()),
            last_throughput_check: Mutex::new(Instant::now()),
        }
    }

    /// Sets slot sizes and allocates `max(initial_slots, predictor.predicted_slots())`
    /// header/payload pairs. Must be called exactly once before producer or
    /// consumer use.
    pub fn initialize_ring(&self, header_size: usize, payload_size: usize, initial_slots: u64) {
        self.header_size.store(header_size, Ordering::Relaxed);
        self.payload_size.store(payload_size, Ordering::Relaxed);

        let target = initial_slots.max(self.inner.predicted_slots());

        let mut ring = self.ring.write();
        for _ in 0..target {
            let header = vec![0u8; header_size];
            let payload = match self.backend.allocate(payload_size) {
                Some(p) => p,
                None => {
                    warn!(target, "pinned allocation failed during ring initialization, stopping early");
                    break;
                }
            };
            ring.headers.push(header);
            ring.payloads.push(payload);
        }

        let actual = ring.headers.len().min(ring.payloads.len());
        ring.headers.truncate(actual);
        ring.payloads.truncate(actual);
        self.slot_count.store(actual as u64, Ordering::Release);
    }

    fn slot_bytes(&self) -> u64 {
        (self.header_size.load(Ordering::Relaxed) + self.payload_size.load(Ordering::Relaxed)) as u64
    }

    /// Unbounded producer acquisition. Never blocks, never refuses; a caller
    /// that lets `current_lag()` grow past `slot_count` is reading
    /// not-yet-safe-to-overwrite slots at its own risk.
    pub fn acquire_write_index(&self) -> usize {
        self.adapt_to_jitter();
        self.total_bytes_processed.fetch_add(self.slot_bytes(), Ordering::Relaxed);
        let prev = self.write_index.fetch_add(1, Ordering::AcqRel);
        let slot_count = self.slot_count.load(Ordering::Acquire).max(1);
        (prev % slot_count) as usize
    }

    /// Bounded variant: performs the same adaptation and bookkeeping, but
    /// returns `None` instead of advancing `write_index` when
    /// `current_lag() >= slot_count` at the moment of the check. A racy,
    /// best-effort back-pressure signal, not a guarantee under concurrent
    /// producers.
    pub fn try_acquire_write_index(&self) -> Option<usize> {
        self.adapt_to_jitter();
        let slot_count = self.slot_count.load(Ordering::Acquire);
        if slot_count == 0 || self.current_lag() as u64 >= slot_count {
            return None;
        }
        self.total_bytes_processed.fetch_add(self.slot_bytes(), Ordering::Relaxed);
        let prev = self.write_index.fetch_add(1, Ordering::AcqRel);
        Some((prev % slot_count) as usize)
    }

    /// Consumer acquisition. The caller must only call this while
    /// `current_lag() > 0`; the arena does not enforce that itself.
    pub fn acquire_read_index(&self) -> usize {
        let slot_count = self.slot_count.load(Ordering::Acquire).max(1);
        let prev = self.read_index.fetch_add(1, Ordering::AcqRel);
        (prev % slot_count) as usize
    }

    pub fn current_lag(&self) -> usize {
        let write_index = self.write_index.load(Ordering::Acquire);
        let read_index = self.read_index.load(Ordering::Acquire);
        write_index.saturating_sub(read_index) as usize
    }

    /// Shared-access lookup; `None` if `i` is out of range. Serializes
    /// against expansion via the ring's reader-writer lock.
    pub fn header_at(&self, i: usize) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        RwLockReadGuard::try_map(self.ring.read(), |ring| ring.headers.get(i).map(|v| v.as_slice())).ok()
    }

    /// Shared-access lookup; `None` if `i` is out of range. Serializes
    /// against expansion via the ring's reader-writer lock.
    pub fn payload_at(&self, i: usize) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        RwLockReadGuard::try_map(self.ring.read(), |ring| ring.payloads.get(i).map(|p| p.as_slice())).ok()
    }

    /// Current EMA of observed throughput in GiB/s.
    pub fn average_throughput_gbs(&self) -> f64 {
        *self.avg_throughput_gbs.lock()
    }

    pub fn ring_size(&self) -> u64 {
        self.slot_count.load(Ordering::Acquire)
    }

    fn adapt_to_jitter(&self) {
        let lag = self.current_lag() as u64;
        self.inner.observe_lag(lag);

        {
            let mut last_check = self.last_throughput_check.lock();
            let elapsed = last_check.elapsed();
            if elapsed >= THROUGHPUT_WINDOW {
                let bytes = self.total_bytes_processed.swap(0, Ordering::AcqRel);
                let gb_s = (bytes as f64 / (1u64 << 30) as f64) / elapsed.as_secs_f64();
                let mut avg = self.avg_throughput_gbs.lock();
                *avg = 0.7 * gb_s + 0.3 * *avg;
                *last_check = Instant::now();
            }
        }

        let gate_open = {
            let mut last_adapt = self.last_adapt_time.lock();
            if last_adapt.elapsed() >= EXPANSION_COOLDOWN {
                *last_adapt = Instant::now();
                true
            } else {
                false
            }
        };
        if !gate_open {
            return;
        }

        let predicted_slots = self.inner.predicted_slots();
        let current_slots = self.slot_count.load(Ordering::Acquire);
        if predicted_slots <= current_slots {
            return;
        }

        let projected = predicted_slots * self.slot_bytes().max(1);
        let hard_limit = self.inner.config().hard_limit_bytes;
        if projected > hard_limit {
            warn!(projected, hard_limit, "ring expansion rejected: hard limit exceeded");
            return;
        }

        self.expand_to(predicted_slots);
    }

    fn expand_to(&self, target_slots: u64) {
        let header_size = self.header_size.load(Ordering::Relaxed);
        let payload_size = self.payload_size.load(Ordering::Relaxed);

        let mut ring = self.ring.write();
        let current = ring.headers.len() as u64;
        let mut added = 0u64;
        for _ in current..target_slots {
            let header = vec![0u8; header_size];
            let payload = match self.backend.allocate(payload_size) {
                Some(p) => p,
                None => {
                    warn!(current, target_slots, "pinned allocation failed during expansion, stopping at current size");
                    break;
                }
            };
            ring.headers.push(header);
            ring.payloads.push(payload);
            added += 1;
        }

        if added == 0 {
            return;
        }

        let actual = ring.headers.len().min(ring.payloads.len()) as u64;
        // Publish-after-initialize: the vectors are already fully extended
        // above, so readers that observe this new slot_count see matching entries.
        self.slot_count.store(actual, Ordering::Release);
    }
}

impl Arena for StreamingArena {
    fn allocate(&self, size: usize, align: usize) -> Option<*mut u8> {
        self.inner.allocate(size, align)
    }

    fn deallocate(&self, ptr: *mut u8, size: usize, align: usize) {
        self.inner.deallocate(ptr, size, align)
    }

    fn equals(&self, other: &dyn Arena) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(o) => std::ptr::eq(self, o),
            None => false,
        }
    }

    fn reset_learning(&self) {
        self.inner.reset_learning();
    }

    fn save_statistics(&self) {
        self.inner.save_statistics();
    }

    fn telemetry(&self) -> ArenaTelemetry {
        let (current_usage, peak_usage) = self.inner.usage_snapshot();
        let slot_count = self.slot_count.load(Ordering::Acquire);
        ArenaTelemetry {
            current_usage,
            peak_usage,
            predicted_bytes: self.inner.predicted_bytes(),
            ring_size: slot_count,
            ring_occupancy: self.current_lag() as u64,
            predicted_slots: self.inner.predicted_slots(),
            average_throughput_gbs: self.average_throughput_gbs(),
            is_warmed_up: slot_count >= crate::predictor::MIN_PREDICTED_SLOTS,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
