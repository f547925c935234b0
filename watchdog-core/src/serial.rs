//! Serial port transport for the keepalive link
//!
//! `serialport` is blocking, so each operation moves the port onto the
//! blocking pool and hands it back afterwards. While a read is in flight the
//! port is owned by that task, which keeps at most one probe outstanding.

use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{LinkUnavailable, PortCandidate};
use crate::keepalive::saturating_deadline;
use crate::link::LineTransport;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Granularity of a single blocking read while waiting for a line
const READ_SLICE: Duration = Duration::from_millis(100);

/// Lists serial endpoints on this machine. Best-effort: enumeration failures
/// yield an empty list.
pub fn available_endpoints() -> Vec<PortCandidate> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|port| PortCandidate {
                description: describe_port(&port.port_type),
                device: port.port_name,
            })
            .collect(),
        Err(e) => {
            debug!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

fn describe_port(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

/// The part of a serial port the line framing needs
trait PortIo: Read + Write + Send {
    fn bytes_waiting(&self) -> io::Result<usize>;
}

impl PortIo for Box<dyn SerialPort> {
    fn bytes_waiting(&self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

struct SerialLine<P> {
    port: P,
    pending: Vec<u8>,
}

impl<P: PortIo> SerialLine<P> {
    fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    fn read_chunk(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        match self.port.read(&mut buf) {
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Partial data left at the deadline is returned as the line, the same
    /// way a line read with a timeout behaves on most serial stacks.
    fn read_line(&mut self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            self.read_chunk()?;
        }
    }

    fn discard(&mut self) -> io::Result<Vec<String>> {
        let waiting = self.port.bytes_waiting()?;
        if waiting > 0 {
            let mut buf = vec![0u8; waiting];
            let n = self.port.read(&mut buf)?;
            self.pending.extend_from_slice(&buf[..n]);
        }
        let stale = std::mem::take(&mut self.pending);
        Ok(String::from_utf8_lossy(&stale)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }
}

/// Serial port carrying the keepalive exchange.
///
/// Dropping it closes the port. An I/O error also closes it, since the link
/// is considered lost from then on.
pub struct SerialTransport {
    endpoint: String,
    line: Option<SerialLine<Box<dyn SerialPort>>>,
}

impl SerialTransport {
    pub fn open(endpoint: &str, baud_rate: u32) -> Result<Self, LinkUnavailable> {
        let port = serialport::new(endpoint, baud_rate)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| LinkUnavailable::new(endpoint, e).with_alternatives(available_endpoints()))?;

        info!("Opened serial port {} @ {} baud", endpoint, baud_rate);
        Ok(Self {
            endpoint: endpoint.to_string(),
            line: Some(SerialLine::new(port)),
        })
    }

    async fn with_line<F, R>(&mut self, op: F) -> Result<R, LinkUnavailable>
    where
        F: FnOnce(&mut SerialLine<Box<dyn SerialPort>>) -> io::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut line = self
            .line
            .take()
            .ok_or_else(|| self.unavailable("serial port already released"))?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = op(&mut line);
            (line, result)
        })
        .await;

        match joined {
            Ok((line, Ok(value))) => {
                self.line = Some(line);
                Ok(value)
            }
            Ok((_closed, Err(e))) => Err(self.unavailable(e)),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> LinkUnavailable {
        LinkUnavailable::new(&self.endpoint, reason).with_alternatives(available_endpoints())
    }
}

#[async_trait]
impl LineTransport for SerialTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn discard_input(&mut self) -> Result<Vec<String>, LinkUnavailable> {
        self.with_line(|line| line.discard()).await
    }

    async fn send_line(&mut self, text: &str) -> Result<(), LinkUnavailable> {
        let text = text.to_string();
        self.with_line(move |line| line.send(&text)).await
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable> {
        let deadline = saturating_deadline(tokio::time::Instant::now(), timeout).into_std();
        self.with_line(move |line| line.read_line(deadline)).await
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.line.take().is_some() {
            info!("Released serial port {}", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::LinkResult;
    use crate::link::classify_response;
    use std::collections::VecDeque;

    /// Port fed with byte chunks; an empty queue reads as a timeout
    #[derive(Default)]
    struct ChunkPort {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ChunkPort {
        fn with(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Read for ChunkPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl Write for ChunkPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PortIo for ChunkPort {
        fn bytes_waiting(&self) -> io::Result<usize> {
            Ok(self.chunks.iter().map(Vec::len).sum())
        }
    }

    fn read(line: &mut SerialLine<ChunkPort>) -> LinkResult {
        let deadline = Instant::now() + Duration::from_millis(50);
        classify_response(line.read_line(deadline).unwrap().as_deref())
    }

    #[test]
    fn test_crlf_terminated_ack() {
        let mut line = SerialLine::new(ChunkPort::with(&[b"ACK\r\n"]));
        assert_eq!(read(&mut line), LinkResult::Ack);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut line = SerialLine::new(ChunkPort::with(&[b"A", b"CK", b"\n"]));
        assert_eq!(read(&mut line), LinkResult::Ack);
    }

    #[test]
    fn test_several_lines_in_one_chunk() {
        let mut line = SerialLine::new(ChunkPort::with(&[b"noise\nACK\n"]));
        assert_eq!(read(&mut line), LinkResult::Malformed(b"noise".to_vec()));
        assert_eq!(read(&mut line), LinkResult::Ack);
    }

    #[test]
    fn test_partial_line_at_deadline() {
        let mut line = SerialLine::new(ChunkPort::with(&[b"AC"]));
        assert_eq!(read(&mut line), LinkResult::Malformed(b"AC".to_vec()));
        assert!(line.pending.is_empty());
    }

    #[test]
    fn test_nothing_at_deadline() {
        let mut line = SerialLine::new(ChunkPort::default());
        assert_eq!(read(&mut line), LinkResult::Timeout);
    }

    #[test]
    fn test_discard_returns_stale_lines() {
        let mut line = SerialLine::new(ChunkPort::with(&[b"Keepalive MQTT enviado\r\n\r\nWiFi OK\r\nAC"]));
        assert_eq!(line.discard().unwrap(), vec!["Keepalive MQTT enviado", "WiFi OK", "AC"]);
        assert!(line.pending.is_empty());
        assert_eq!(read(&mut line), LinkResult::Timeout);
    }

    #[test]
    fn test_send_appends_newline() {
        let mut line = SerialLine::new(ChunkPort::default());
        line.send("KEEPALIVE").unwrap();
        assert_eq!(line.port.written, b"KEEPALIVE\n");
    }

    #[test]
    fn test_open_missing_port_is_link_unavailable() {
        let err = match SerialTransport::open("/dev/atx-watchdog-does-not-exist", DEFAULT_BAUD_RATE) {
            Ok(_) => panic!("opening a missing port must fail"),
            Err(e) => e,
        };
        assert_eq!(err.endpoint, "/dev/atx-watchdog-does-not-exist");
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn test_describe_port() {
        assert_eq!(describe_port(&SerialPortType::PciPort), "PCI serial port");
        assert_eq!(describe_port(&SerialPortType::Unknown), "n/a");
    }
}
