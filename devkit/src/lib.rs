/*!
# Watchdog DevKit - stubs and utilities for testing without hardware

- In-memory command relay, no broker needed
- Scripted and firmware-backed serial devices, no USB adapter needed
- Test harness with expectations on published commands
*/

pub mod mqtt_stub;
pub mod serial_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockRelay};
pub use serial_stub::{DeviceHandle, FirmwareDevice, FirmwareHandle, Reply, ScriptedDevice};
pub use test_utils::TestHarness;
