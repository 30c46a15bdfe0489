//! Command handlers.

pub mod apply;
pub mod budget;
pub mod get;
pub mod serve;
pub mod spawns;

pub use apply::handle_apply;
pub use budget::handle_budget;
pub use get::{handle_delete, handle_events, handle_get};
pub use serve::handle_serve;
pub use spawns::handle_spawns;
