pub mod consumer;
pub mod publisher;

pub use consumer::{ConsumerError, ConsumerState, JobConsumer, JobFailure, Outcome};
pub use publisher::{JobPublisher, PublishError};
