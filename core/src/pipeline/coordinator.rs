//! Cache lookup, in-flight de-duplication, and background decode dispatch.
//!
//! Each [`ImageKey`] is either idle or pending. A request on an idle key either hits the
//! cache and is answered immediately, or moves the key to pending and schedules one
//! probe-and-decode job. Requests that arrive while the key is pending attach to the same
//! job. When the job finishes the key returns to idle, the cache is populated on success,
//! and every attached consumer receives the same outcome.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::MemoryCache;
use crate::codec::{DecodedBitmap, Decoder};
use crate::config::PipelineConfig;
use crate::error::{DecodeError, PipelineError};
use crate::stats::{PipelineSnapshot, StatsCollector};
use crate::types::{CacheBudget, ConsumerId, ImageKey, RequestedBounds};

use super::consumer::{BitmapConsumer, ConsumerHandle, Delivery};
use super::sample::compute_sample_factor;
use super::worker::DecodePool;

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Served from the cache; the consumer already received the bitmap.
    CacheHit,
    /// Joined a decode that was already in flight for the key.
    Attached,
    /// Started a new background decode.
    Scheduled,
}

/// An in-flight decode and everyone waiting on it.
#[derive(Debug)]
struct PendingRequest {
    consumers: Vec<ConsumerHandle>,
}

#[derive(Debug)]
struct LoadState {
    cache: MemoryCache,
    pending: HashMap<ImageKey, PendingRequest>,
}

struct Shared {
    decoder: Arc<dyn Decoder>,
    // Cache and pending table share one lock so the miss check and the transition to
    // pending happen as a single step.
    state: Mutex<LoadState>,
    stats: StatsCollector,
    next_consumer: AtomicU64,
}

/// Serves bitmap requests from the cache or a bounded pool of background decodes.
pub struct LoadCoordinator {
    shared: Arc<Shared>,
    pool: DecodePool,
}

impl LoadCoordinator {
    /// Build a coordinator from a decoder and configuration.
    pub fn new(
        decoder: Arc<dyn Decoder>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Self::with_budget(decoder, config.budget()?, config.decode_workers)
    }

    pub fn with_budget(
        decoder: Arc<dyn Decoder>,
        budget: CacheBudget,
        decode_workers: usize,
    ) -> Result<Self, PipelineError> {
        if budget.bytes_max == 0 {
            return Err(PipelineError::InvalidBudget { bytes: 0 });
        }

        let stats = StatsCollector::new();
        stats.update_cache_usage(0, budget.bytes_max as u64, 0);

        let shared = Arc::new(Shared {
            decoder,
            state: Mutex::new(LoadState {
                cache: MemoryCache::new(budget),
                pending: HashMap::new(),
            }),
            stats,
            next_consumer: AtomicU64::new(0),
        });

        Ok(Self { shared, pool: DecodePool::new(decode_workers)? })
    }

    /// Request the bitmap for `key`, sized for `bounds`, on behalf of `consumer`.
    ///
    /// Zero-sized bounds are rejected before anything is scheduled. A cache hit is
    /// delivered before this returns; otherwise delivery happens from a worker thread.
    /// The coordinator only keeps a weak reference to `consumer`. When requests for one
    /// key overlap, the decode is sized for the bounds of the request that started it.
    pub fn request<C>(
        &self,
        key: ImageKey,
        bounds: RequestedBounds,
        consumer: &Arc<C>,
    ) -> Result<RequestOutcome, PipelineError>
    where
        C: BitmapConsumer + 'static,
    {
        bounds.validate()?;

        let id = ConsumerId::new(self.shared.next_consumer.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = ConsumerHandle::new(id, consumer);

        let mut state = self.shared.state.lock();
        if let Some(bitmap) = state.cache.get(&key) {
            drop(state);
            self.shared.stats.record_cache_lookup(true);
            handle.deliver(Ok(bitmap));
            return Ok(RequestOutcome::CacheHit);
        }

        if let Some(pending) = state.pending.get_mut(&key) {
            pending.consumers.push(handle);
            let waiting = pending.consumers.len();
            drop(state);
            self.shared.stats.record_cache_lookup(false);
            debug!(
                target: "pipeline::coordinator",
                key = %key,
                waiting,
                "attached to in-flight decode"
            );
            return Ok(RequestOutcome::Attached);
        }

        state.pending.insert(key.clone(), PendingRequest { consumers: vec![handle] });
        self.shared.stats.update_pending_decodes(state.pending.len());
        drop(state);

        self.shared.stats.record_cache_lookup(false);
        self.shared.stats.record_decode_started();
        debug!(
            target: "pipeline::coordinator",
            key = %key,
            width = bounds.req_width,
            height = bounds.req_height,
            "scheduling decode"
        );

        let shared = Arc::clone(&self.shared);
        self.pool.submit(move || shared.complete(key, bounds));
        Ok(RequestOutcome::Scheduled)
    }

    /// Cached bitmap for `key`, refreshing its recency. Never schedules work.
    pub fn cached(&self, key: &ImageKey) -> Option<Arc<DecodedBitmap>> {
        self.shared.state.lock().cache.get(key)
    }

    /// Whether `key` is resident, without touching recency.
    pub fn is_cached(&self, key: &ImageKey) -> bool {
        self.shared.state.lock().cache.contains(key)
    }

    /// Total byte cost of cached bitmaps.
    pub fn cache_size(&self) -> usize {
        self.shared.state.lock().cache.size()
    }

    pub fn cache_len(&self) -> usize {
        self.shared.state.lock().cache.len()
    }

    /// Keys with a decode in flight.
    pub fn pending_decodes(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Drop a cached bitmap. Consumers holding it keep their copy.
    pub fn evict(&self, key: &ImageKey) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.cache.remove(key).is_some();
        self.shared.publish_usage(&state.cache);
        removed
    }

    pub fn clear_cache(&self) {
        let mut state = self.shared.state.lock();
        state.cache.clear();
        self.shared.publish_usage(&state.cache);
    }

    /// Block until every scheduled decode has delivered.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    pub fn stats(&self) -> PipelineSnapshot {
        self.shared.stats.snapshot()
    }
}

impl fmt::Debug for LoadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("LoadCoordinator")
            .field("cache", &state.cache)
            .field("pending", &state.pending.len())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Shared {
    /// Worker-side half of a load: decode, populate the cache, fan out the outcome.
    fn complete(&self, key: ImageKey, bounds: RequestedBounds) {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load(&key, bounds)))
            .unwrap_or_else(|_| Err(DecodeError::Panicked { key: key.to_string() }));

        let (delivery, consumers): (Delivery, _) = {
            let mut state = self.state.lock();
            let delivery = match outcome {
                Ok(bitmap) => Ok(state.cache.get_or_put(key.clone(), Arc::new(bitmap))),
                Err(err) => Err(err),
            };
            let consumers = state.pending.remove(&key).map(|p| p.consumers).unwrap_or_default();
            self.publish_usage(&state.cache);
            self.stats.update_pending_decodes(state.pending.len());
            (delivery, consumers)
        };

        match &delivery {
            Ok(bitmap) => {
                self.stats.record_decode(started.elapsed());
                debug!(
                    target: "pipeline::coordinator",
                    key = %key,
                    width = bitmap.width(),
                    height = bitmap.height(),
                    sample_factor = bitmap.sample_factor(),
                    consumers = consumers.len(),
                    "decode finished"
                );
            }
            Err(err) => {
                self.stats.record_decode_failure();
                warn!(target: "pipeline::coordinator", key = %key, "decode failed: {err}");
            }
        }

        for consumer in consumers {
            consumer.deliver(delivery.clone());
        }
    }

    fn load(&self, key: &ImageKey, bounds: RequestedBounds) -> Result<DecodedBitmap, DecodeError> {
        let native = self.decoder.probe_dimensions(key)?;
        if native.is_empty() {
            return Err(DecodeError::EmptyImage {
                key: key.to_string(),
                width: native.width,
                height: native.height,
            });
        }

        let factor = compute_sample_factor(native, bounds);
        self.decoder.decode(key, factor)
    }

    fn publish_usage(&self, cache: &MemoryCache) {
        self.stats.update_cache_usage(
            cache.size() as u64,
            cache.budget().bytes_max as u64,
            cache.evictions(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::consumer::DeliverySlot;
    use crate::types::{ImageDimensions, NativeDimensions};

    struct SolidDecoder;

    impl Decoder for SolidDecoder {
        fn probe_dimensions(&self, _key: &ImageKey) -> Result<NativeDimensions, DecodeError> {
            Ok(ImageDimensions::new(8, 8))
        }

        fn decode(&self, _key: &ImageKey, factor: u32) -> Result<DecodedBitmap, DecodeError> {
            let dims = ImageDimensions::new(8 / factor, 8 / factor);
            Ok(DecodedBitmap::new(dims, factor, vec![7; dims.rgba_len()]))
        }
    }

    fn coordinator() -> LoadCoordinator {
        LoadCoordinator::with_budget(Arc::new(SolidDecoder), CacheBudget::new(1024).unwrap(), 1)
            .expect("coordinator")
    }

    #[test]
    fn miss_then_hit() {
        let coordinator = coordinator();
        let key = ImageKey::new("tile");
        let first = DeliverySlot::new();
        let outcome = coordinator.request(key.clone(), RequestedBounds::new(4, 4), &first).unwrap();
        assert_eq!(outcome, RequestOutcome::Scheduled);

        let bitmap = first.wait().expect("decoded");
        assert_eq!(bitmap.dimensions(), ImageDimensions::new(4, 4));
        coordinator.wait_idle();

        let second = DeliverySlot::new();
        let outcome = coordinator.request(key, RequestedBounds::new(4, 4), &second).unwrap();
        assert_eq!(outcome, RequestOutcome::CacheHit);
        assert!(Arc::ptr_eq(&second.try_take().unwrap().unwrap(), &bitmap));
        assert_eq!(coordinator.cache_size(), 64);
        assert_eq!(coordinator.pending_decodes(), 0);
    }

    #[test]
    fn evict_and_clear_release_bytes() {
        let coordinator = coordinator();
        let slot = DeliverySlot::new();
        coordinator.request(ImageKey::new("a"), RequestedBounds::new(8, 8), &slot).unwrap();
        coordinator.request(ImageKey::new("b"), RequestedBounds::new(8, 8), &slot).unwrap();
        coordinator.wait_idle();
        assert_eq!(coordinator.cache_len(), 2);

        assert!(coordinator.evict(&ImageKey::new("a")));
        assert!(!coordinator.evict(&ImageKey::new("a")));
        assert_eq!(coordinator.cache_size(), 256);

        coordinator.clear_cache();
        assert_eq!(coordinator.cache_size(), 0);
        assert_eq!(coordinator.stats().cache_bytes_used, 0);
    }
}
