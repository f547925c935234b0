/*!
Simulated serial devices for keepalive tests without a USB adapter

- [`ScriptedDevice`] replays a fixed list of replies, one per line sent
- [`FirmwareDevice`] answers the way the real firmware does and keeps its
  watchdog timer running on the tokio clock

Both hand out a handle that stays valid after the device has been moved into
a supervisor, so tests can inspect the traffic and check the port was
released.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use watchdog_core::{ButtonPress, FirmwareWatchdog, LineTransport, LinkUnavailable};

/// What the device does after receiving one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Line(String),
    /// Say nothing; the host's read times out
    Silence,
    /// The adapter disappears
    Disconnect,
}

impl Reply {
    pub fn ack() -> Self {
        Reply::Line("ACK".to_string())
    }
}

#[derive(Debug, Default)]
struct Traffic {
    sent: Mutex<Vec<(Instant, String)>>,
    chatter: Mutex<Vec<String>>,
    released: AtomicBool,
}

/// Shared view of a simulated device's serial traffic
#[derive(Debug, Clone, Default)]
pub struct DeviceHandle {
    traffic: Arc<Traffic>,
}

impl DeviceHandle {
    /// Lines the host wrote, in order
    pub fn sent_lines(&self) -> Vec<String> {
        self.traffic.sent.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    /// When each line was written
    pub fn sent_at(&self) -> Vec<Instant> {
        self.traffic.sent.lock().iter().map(|(at, _)| *at).collect()
    }

    /// Queue unsolicited device output, like the firmware's debug prints
    pub fn push_chatter(&self, line: impl Into<String>) {
        self.traffic.chatter.lock().push(line.into());
    }

    pub fn pending_chatter(&self) -> usize {
        self.traffic.chatter.lock().len()
    }

    /// True once the device has been dropped
    pub fn is_released(&self) -> bool {
        self.traffic.released.load(Ordering::SeqCst)
    }

    fn record(&self, line: &str) {
        self.traffic.sent.lock().push((Instant::now(), line.to_string()));
    }

    fn take_chatter(&self) -> Vec<String> {
        std::mem::take(&mut *self.traffic.chatter.lock())
    }

    fn release(&self) {
        self.traffic.released.store(true, Ordering::SeqCst);
    }
}

async fn answer(endpoint: &str, reply: Option<Reply>, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable> {
    match reply {
        Some(Reply::Line(line)) => Ok(Some(line.into_bytes())),
        Some(Reply::Disconnect) => Err(LinkUnavailable::new(endpoint, "device disconnected")),
        Some(Reply::Silence) | None => {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }
    }
}

/// Device that answers from a script. Once the script runs out it keeps
/// giving the fallback reply (silence unless configured otherwise).
pub struct ScriptedDevice {
    endpoint: String,
    script: VecDeque<Reply>,
    fallback: Reply,
    pending: Option<Reply>,
    handle: DeviceHandle,
}

impl ScriptedDevice {
    pub fn new(endpoint: impl Into<String>, script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            endpoint: endpoint.into(),
            script: script.into_iter().collect(),
            fallback: Reply::Silence,
            pending: None,
            handle: DeviceHandle::default(),
        }
    }

    /// Device that acknowledges everything
    pub fn acking(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, Vec::new()).then(Reply::ack())
    }

    pub fn then(mut self, fallback: Reply) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl LineTransport for ScriptedDevice {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn discard_input(&mut self) -> Result<Vec<String>, LinkUnavailable> {
        Ok(self.handle.take_chatter())
    }

    async fn send_line(&mut self, line: &str) -> Result<(), LinkUnavailable> {
        self.handle.record(line);
        self.pending = Some(self.script.pop_front().unwrap_or_else(|| self.fallback.clone()));
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable> {
        answer(&self.endpoint, self.pending.take(), timeout).await
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Device running the firmware model. Its watchdog is polled on every
/// exchange and on demand through [`FirmwareHandle::poll`].
pub struct FirmwareDevice {
    endpoint: String,
    firmware: Arc<Mutex<FirmwareWatchdog>>,
    pending: Option<Reply>,
    handle: FirmwareHandle,
}

#[derive(Debug, Clone)]
pub struct FirmwareHandle {
    device: DeviceHandle,
    firmware: Arc<Mutex<FirmwareWatchdog>>,
    presses: Arc<Mutex<Vec<ButtonPress>>>,
    responsive: Arc<AtomicBool>,
}

impl FirmwareHandle {
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Advance the firmware's main loop to `now`
    pub fn poll(&self, now: Instant) -> Option<ButtonPress> {
        let press = self.firmware.lock().poll(now);
        if let Some(press) = press {
            log::warn!("⚡ [SIM] Watchdog fired: {:?} for {} ms", press.action, press.duration_ms);
            self.presses.lock().push(press);
        }
        press
    }

    pub fn presses(&self) -> Vec<ButtonPress> {
        self.presses.lock().clone()
    }

    pub fn is_armed(&self) -> bool {
        self.firmware.lock().is_armed()
    }

    /// A hung device still receives lines but stops answering them
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }
}

impl FirmwareDevice {
    pub fn new(endpoint: impl Into<String>, firmware: FirmwareWatchdog) -> Self {
        let firmware = Arc::new(Mutex::new(firmware));
        Self {
            endpoint: endpoint.into(),
            firmware: firmware.clone(),
            pending: None,
            handle: FirmwareHandle {
                device: DeviceHandle::default(),
                firmware,
                presses: Arc::new(Mutex::new(Vec::new())),
                responsive: Arc::new(AtomicBool::new(true)),
            },
        }
    }

    pub fn handle(&self) -> FirmwareHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl LineTransport for FirmwareDevice {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn discard_input(&mut self) -> Result<Vec<String>, LinkUnavailable> {
        Ok(self.handle.device.take_chatter())
    }

    async fn send_line(&mut self, line: &str) -> Result<(), LinkUnavailable> {
        let now = Instant::now();
        self.handle.device.record(line);
        self.handle.poll(now);
        if !self.handle.responsive.load(Ordering::SeqCst) {
            self.pending = Some(Reply::Silence);
            return Ok(());
        }
        let reply = self.firmware.lock().handle_line(line, now);
        self.pending = Some(reply.map_or(Reply::Silence, |ack| Reply::Line(ack.to_string())));
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable> {
        let reply = answer(&self.endpoint, self.pending.take(), timeout).await;
        self.handle.poll(Instant::now());
        reply
    }
}

impl Drop for FirmwareDevice {
    fn drop(&mut self) {
        self.handle.device.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_script_then_fallback() {
        let mut device = ScriptedDevice::new("sim0", [Reply::ack(), Reply::Line("ERR".to_string())]);
        let handle = device.handle();
        let timeout = Duration::from_secs(2);

        device.send_line("KEEPALIVE").await.unwrap();
        assert_eq!(device.read_line(timeout).await.unwrap(), Some(b"ACK".to_vec()));
        device.send_line("KEEPALIVE").await.unwrap();
        assert_eq!(device.read_line(timeout).await.unwrap(), Some(b"ERR".to_vec()));
        device.send_line("KEEPALIVE").await.unwrap();
        assert_eq!(device.read_line(timeout).await.unwrap(), None);

        assert_eq!(handle.sent_lines().len(), 3);
        drop(device);
        assert!(handle.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_firmware_device_acks_and_fires() {
        let mut device = FirmwareDevice::new("sim1", FirmwareWatchdog::default());
        let handle = device.handle();

        device.send_line("KEEPALIVE").await.unwrap();
        assert_eq!(
            device.read_line(Duration::from_secs(2)).await.unwrap(),
            Some(b"ACK".to_vec())
        );
        assert!(handle.is_armed());

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(handle.poll(Instant::now()).is_some());
        assert!(!handle.is_armed());
        assert_eq!(handle.presses().len(), 1);
    }
}
