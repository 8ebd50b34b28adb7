use thiserror::Error;

pub mod comms;
pub mod config;
pub mod scheduling;

pub use comms::{queue::BoundedQueue, spsc::SharedQueue, QueueStats, Record};
pub use config::ArbiterConfig;
pub use scheduling::{arbiter::PacketArbiter, threaded::ThreadedArbiter, RoundRobin};

/// Error type for all queues and arbiters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MuxError {
    #[error("Queue overflow: push attempted with all {capacity} slots occupied")]
    Overflow { capacity: usize },
    #[error("Nothing to pop, queue is empty")]
    Empty,
    #[error("Queue capacity must be greater than 0")]
    ZeroCapacity,
    #[error("Arbiter needs at least one source")]
    ZeroSources,
    #[error("High-water threshold {threshold} must be below capacity {capacity}")]
    ThresholdTooHigh { threshold: usize, capacity: usize },
    #[error(
        "High-water threshold {threshold} leaves {} of {capacity} slots free, fewer than max burst {max_burst}",
        .capacity - .threshold
    )]
    Underprovisioned {
        threshold: usize,
        capacity: usize,
        max_burst: usize,
    },
    #[error("Max burst {max_burst} must be between 1 and capacity {capacity}")]
    BurstExceedsCapacity { max_burst: usize, capacity: usize },
    #[error("Configured {what} is {configured}, but the arbiter was built for {built}")]
    ShapeMismatch {
        what: &'static str,
        configured: usize,
        built: usize,
    },
    #[error("Word width {width} is outside 1..={max} bits for this payload type")]
    WordWidth { width: usize, max: usize },
    #[error("Payload has bits set above the configured word width of {width}")]
    WordTooWide { width: usize },
    #[error("Word from source {got} arrived inside an open record from source {open}")]
    Interleaved { open: usize, got: usize },
    #[error("Ingress handle for source {0} was already taken")]
    IngressTaken(usize),
    #[error("Source {0} does not exist on this arbiter")]
    InvalidSource(usize),
}
