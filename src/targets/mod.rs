//! Provisioning targets
//!
//! Each target is a closed set of states over its own session; the shared
//! install actions live in [`common`].

pub mod android;
pub mod ash;
pub mod common;
pub mod cros;
pub mod firmware;

pub use android::{AndroidPackage, AndroidRequest, AndroidSession, AndroidState};
pub use ash::{AshRequest, AshSession, AshState};
pub use cros::{CrosRequest, CrosSession, CrosState};
pub use firmware::{FirmwareRequest, FirmwareSession, FirmwareState};
