//! Sandbox runtime handle - lifecycle of one execution environment instance.

pub mod types;

mod core;

pub use core::SandboxRuntime;
pub use types::{RuntimeId, RuntimeInfo, RuntimeStatus, generate_runtime_id};
