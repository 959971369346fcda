//! Sample-factor selection, downsampling, and the background load pipeline.

pub mod consumer;
pub mod coordinator;
pub mod resize;
pub mod sample;
pub mod worker;

pub use consumer::{BitmapConsumer, ConsumerHandle, Delivery, DeliverySlot};
pub use coordinator::{LoadCoordinator, RequestOutcome};
pub use sample::{compute_sample_factor, sampled_dimensions};
pub use worker::DecodePool;
