//! Store-and-forward uplink relay.
//!
//! Inbound feed → [`gateway::Gateway`] → durable queue ← [`drain::DrainWorker`] → [`sink::DeliverySink`].

pub mod drain;
pub mod feed;
pub mod gateway;
pub mod sink;

pub use drain::{CycleReport, DrainConfig, DrainWorker, ExponentialBackoff, FixedInterval, RetryPolicy};
pub use feed::{FeedConfig, FeedError, MqttFeed};
pub use gateway::{Admission, DropReason, Gateway, MalformedInput};
pub use sink::{DeliveryError, DeliverySink, HttpSink};
