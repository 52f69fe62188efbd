pub mod config;
pub mod job;
pub mod messaging; // MemoryBroker is public for integration tests
pub mod observability;
pub mod queue;
pub mod shutdown;
pub mod worker;
