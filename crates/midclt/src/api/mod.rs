//! Typed wrappers over well-known namespaces
//!
//! Each wrapper borrows the [`Client`](crate::Client), binds its method
//! names statically and adds no behavior of its own.

mod core;
mod system;

pub use self::core::{CoreApi, Job, JobState};
pub use self::system::{SystemApi, SystemInfo};
