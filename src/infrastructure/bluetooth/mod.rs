//! Bluetooth Module
//!
//! Provides resilient BLE communication with the motor controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   MotorBleService                        │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!    ┌──────────┬───────┼────────┬───────────┐
//!    │          │       │        │           │
//!    ▼          ▼       ▼        ▼           ▼
//! ┌────────┐ ┌──────┐ ┌───────┐ ┌─────────┐ ┌────────┐
//! │Scanner │ │Conn- │ │Resolv-│ │Transport│ │ Poller │
//! │        │ │ection│ │er     │ │         │ │        │
//! │- settle│ │- retry│ │- UUID │ │- read  │ │- status│
//! │  window│ │- verify│ │ lookup│ │  corr. │ │  loop  │
//! │- retry │ │        │ │       │ │- retry │ │- fatal │
//! └────────┘ └──────┘ └───────┘ └─────────┘ └────────┘
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │    BleAdapter   │  (platform radio boundary)
//!              └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] - Transport trait over the platform BLE stack
//! - [`codec`] - Device UUIDs, payload encoding, and status decoding
//! - [`connection`] - Connect with retry, stabilization, and verification
//! - [`error`] - Error taxonomy and platform error codes
//! - [`mock`] - Scriptable in-memory peripheral
//! - [`poller`] - Periodic status polling and fatal-error classification
//! - [`resolver`] - Service and characteristic lookup by UUID
//! - [`scanner`] - Device discovery with bounded auto-retry
//! - [`service`] - Main service coordinator

pub mod adapter;
pub mod codec;
pub mod connection;
pub mod error;
pub mod mock;
pub mod poller;
pub mod resolver;
pub mod scanner;
pub mod service;
pub mod transport;

pub use adapter::{BleAdapter, SharedAdapter};
pub use error::BleError;
pub use scanner::ScanOutcome;
pub use service::MotorBleService;
