//! Message bus adapters.

pub mod guarded;
pub mod memory;

pub use guarded::GuardedBus;
pub use memory::InMemoryBus;
