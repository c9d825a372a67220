//! Infrastructure: storage backends and logging setup.

pub mod logging;
pub mod memory;
