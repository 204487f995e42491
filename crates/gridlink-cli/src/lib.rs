//! Shared modules for the `gridlink` binary

pub mod api;
pub mod store;
