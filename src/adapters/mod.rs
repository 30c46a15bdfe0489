//! Adapters: concrete implementations of the domain ports.

pub mod bus;
pub mod runtime;
pub mod sqlite;
