//! Infrastructure layer: platform-facing concerns.

pub mod bluetooth;
pub mod logging;
