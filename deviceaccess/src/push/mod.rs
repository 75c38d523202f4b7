//! The push-data engine: bounded per-subscriber queues, distribution
//! domains, and the interrupt dispatcher threads feeding them.

pub mod dispatcher;
pub mod domain;
pub mod variable;

pub use dispatcher::{InterruptDispatcher, InterruptSource};
pub use domain::{AsyncDomain, AsyncVariable};
pub use variable::{Payload, PushChannel, QueueItem};
