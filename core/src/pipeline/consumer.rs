//! Delivery targets for decoded bitmaps.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::codec::DecodedBitmap;
use crate::error::DecodeError;
use crate::types::ConsumerId;

/// Outcome handed to every consumer attached to a load.
pub type Delivery = Result<Arc<DecodedBitmap>, DecodeError>;

/// Something that displays or otherwise uses a loaded bitmap.
pub trait BitmapConsumer: Send + Sync {
    fn deliver(&self, delivery: Delivery);

    /// Whether the consumer still wants results. A display target that was recycled
    /// for another image returns `false` and is skipped.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Non-owning reference to a consumer: the coordinator never keeps a consumer alive.
#[derive(Clone)]
pub struct ConsumerHandle {
    id: ConsumerId,
    target: Weak<dyn BitmapConsumer>,
}

impl ConsumerHandle {
    pub fn new<C: BitmapConsumer + 'static>(id: ConsumerId, consumer: &Arc<C>) -> Self {
        let target: Weak<C> = Arc::downgrade(consumer);
        let target: Weak<dyn BitmapConsumer> = target;
        Self { id, target }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Deliver unless the consumer is gone; returns whether delivery happened.
    ///
    /// A consumer that panics counts as not delivered and does not affect the caller.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        match self.target.upgrade() {
            Some(consumer) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    if !consumer.is_alive() {
                        return false;
                    }
                    consumer.deliver(delivery);
                    true
                }));
                match outcome {
                    Ok(true) => true,
                    Ok(false) => {
                        trace!(
                            target: "pipeline::consumer",
                            consumer = self.id.as_u64(),
                            "consumer no longer alive, skipping delivery"
                        );
                        false
                    }
                    Err(_) => {
                        warn!(
                            target: "pipeline::consumer",
                            consumer = self.id.as_u64(),
                            "consumer panicked during delivery"
                        );
                        false
                    }
                }
            }
            None => {
                trace!(
                    target: "pipeline::consumer",
                    consumer = self.id.as_u64(),
                    "consumer gone, skipping delivery"
                );
                false
            }
        }
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.id)
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Consumer that stores the first delivery and lets a thread block until it arrives.
#[derive(Debug, Default)]
pub struct DeliverySlot {
    result: Mutex<Option<Delivery>>,
    ready: Condvar,
    detached: AtomicBool,
}

impl DeliverySlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stop accepting deliveries, as a display target does once it shows something else.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Take the delivery if it has already arrived.
    pub fn try_take(&self) -> Option<Delivery> {
        self.result.lock().take()
    }

    /// Block until a delivery arrives.
    pub fn wait(&self) -> Delivery {
        let mut guard = self.result.lock();
        loop {
            if let Some(delivery) = guard.take() {
                return delivery;
            }
            self.ready.wait(&mut guard);
        }
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Delivery> {
        let mut guard = self.result.lock();
        if guard.is_none() {
            let _ = self.ready.wait_while_for(&mut guard, |slot| slot.is_none(), timeout);
        }
        guard.take()
    }
}

impl BitmapConsumer for DeliverySlot {
    fn deliver(&self, delivery: Delivery) {
        let mut guard = self.result.lock();
        if guard.is_none() {
            *guard = Some(delivery);
            self.ready.notify_all();
        }
    }

    fn is_alive(&self) -> bool {
        !self.detached.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageDimensions;

    fn bitmap() -> Arc<DecodedBitmap> {
        Arc::new(DecodedBitmap::new(ImageDimensions::new(1, 1), 1, vec![0; 4]))
    }

    #[test]
    fn handle_does_not_keep_consumer_alive() {
        let slot = DeliverySlot::new();
        let handle = ConsumerHandle::new(ConsumerId::new(1), &slot);
        drop(slot);
        assert!(!handle.deliver(Ok(bitmap())));
    }

    #[test]
    fn detached_slots_are_skipped() {
        let slot = DeliverySlot::new();
        let handle = ConsumerHandle::new(ConsumerId::new(2), &slot);
        slot.detach();
        assert!(!handle.deliver(Ok(bitmap())));
        assert!(slot.try_take().is_none());
    }

    struct Exploding;

    impl BitmapConsumer for Exploding {
        fn deliver(&self, _delivery: Delivery) {
            panic!("display target torn down mid-delivery");
        }
    }

    #[test]
    fn panicking_consumer_counts_as_not_delivered() {
        let consumer = Arc::new(Exploding);
        let handle = ConsumerHandle::new(ConsumerId::new(5), &consumer);
        assert!(!handle.deliver(Ok(bitmap())));
    }

    #[test]
    fn slot_keeps_first_delivery() {
        let slot = DeliverySlot::new();
        let handle = ConsumerHandle::new(ConsumerId::new(3), &slot);
        let first = bitmap();
        assert!(handle.deliver(Ok(Arc::clone(&first))));
        handle.deliver(Err(DecodeError::NotFound { key: "late".into() }));

        let delivered = slot.wait_timeout(Duration::from_millis(10)).expect("delivered");
        assert!(Arc::ptr_eq(&delivered.unwrap(), &first));
        assert!(slot.wait_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn wait_blocks_until_another_thread_delivers() {
        let slot = DeliverySlot::new();
        let handle = ConsumerHandle::new(ConsumerId::new(4), &slot);
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.deliver(Ok(bitmap()));
        });
        assert!(slot.wait().is_ok());
        worker.join().unwrap();
    }
}
