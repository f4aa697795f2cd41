//! Remote network driver API served to the container engine.

pub mod server;
pub mod types;
