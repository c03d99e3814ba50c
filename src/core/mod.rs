//! Core resource handling shared by the dump and ring-buffer paths

pub mod guard;
pub mod staging;

pub use guard::ScopeGuard;
pub use staging::{copy_to_host, stage_to_host, HostBuffer};
