//! Interval-driven device recording.

pub mod device;
pub mod msr;

pub use device::{ConfigurationItem, Device, DeviceRecorder};
pub use msr::MsrDevice;
