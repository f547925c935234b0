//! Line-oriented keepalive exchange with the watchdog
//!
//! Host sends `KEEPALIVE\n`, the device answers `ACK\n`. Anything else the
//! device prints is diagnostic chatter and counts as a malformed reply.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::LinkUnavailable;
use crate::keepalive::LinkResult;

pub const KEEPALIVE_TOKEN: &str = "KEEPALIVE";
pub const ACK_TOKEN: &str = "ACK";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte transport carrying newline-terminated lines.
///
/// Any error is a lost transport; timeouts are reported as `Ok(None)`.
#[async_trait]
pub trait LineTransport: Send {
    fn endpoint(&self) -> &str;

    /// Drop whatever arrived since the last exchange, returning it as lines
    async fn discard_input(&mut self) -> Result<Vec<String>, LinkUnavailable>;

    /// Write `line` followed by `\n` and flush
    async fn send_line(&mut self, line: &str) -> Result<(), LinkUnavailable>;

    /// Wait at most `timeout` for one line, without its terminator
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable>;
}

/// Classify a reply. Whitespace around the line is ignored, the token
/// comparison itself is exact and case-sensitive.
pub fn classify_response(line: Option<&[u8]>) -> LinkResult {
    let Some(line) = line else {
        return LinkResult::Timeout;
    };
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        LinkResult::Timeout
    } else if trimmed == ACK_TOKEN.as_bytes() {
        LinkResult::Ack
    } else {
        LinkResult::Malformed(trimmed.to_vec())
    }
}

pub struct SerialLinkChannel<T> {
    transport: T,
}

impl<T: LineTransport> SerialLinkChannel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// One keepalive exchange, bounded by `timeout`
    pub async fn probe(&mut self, timeout: Duration) -> Result<LinkResult, LinkUnavailable> {
        for stale in self.transport.discard_input().await? {
            debug!("Discarding device output before probe: {}", stale);
        }
        self.transport.send_line(KEEPALIVE_TOKEN).await?;
        let reply = self.transport.read_line(timeout).await?;
        Ok(classify_response(reply.as_deref()))
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct CannedTransport {
        replies: VecDeque<Option<&'static str>>,
        stale: Vec<String>,
        sent: Vec<String>,
        lost: bool,
    }

    impl CannedTransport {
        fn new(replies: &[Option<&'static str>]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                stale: Vec::new(),
                sent: Vec::new(),
                lost: false,
            }
        }
    }

    #[async_trait]
    impl LineTransport for CannedTransport {
        fn endpoint(&self) -> &str {
            "canned"
        }

        async fn discard_input(&mut self) -> Result<Vec<String>, LinkUnavailable> {
            Ok(std::mem::take(&mut self.stale))
        }

        async fn send_line(&mut self, line: &str) -> Result<(), LinkUnavailable> {
            if self.lost {
                return Err(LinkUnavailable::new("canned", "device removed"));
            }
            self.sent.push(line.to_string());
            Ok(())
        }

        async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkUnavailable> {
            match self.replies.pop_front().flatten() {
                Some(line) => Ok(Some(line.as_bytes().to_vec())),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(classify_response(None), LinkResult::Timeout);
        assert_eq!(classify_response(Some(b"")), LinkResult::Timeout);
        assert_eq!(classify_response(Some(b" \r")), LinkResult::Timeout);
        assert_eq!(classify_response(Some(b"ACK")), LinkResult::Ack);
        assert_eq!(classify_response(Some(b"ACK\r")), LinkResult::Ack);
        assert_eq!(classify_response(Some(b"ack")), LinkResult::Malformed(b"ack".to_vec()));
        assert_eq!(classify_response(Some(b"ACKNOWLEDGED")), LinkResult::Malformed(b"ACKNOWLEDGED".to_vec()));
        assert_eq!(
            classify_response(Some(b"Keepalive MQTT enviado\r")),
            LinkResult::Malformed(b"Keepalive MQTT enviado".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_sends_token_and_reads_ack() {
        let mut channel = SerialLinkChannel::new(CannedTransport::new(&[Some("ACK")]));
        let result = channel.probe(DEFAULT_PROBE_TIMEOUT).await.unwrap();
        assert_eq!(result, LinkResult::Ack);
        assert_eq!(channel.into_inner().sent, vec!["KEEPALIVE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out_within_bound() {
        let mut channel = SerialLinkChannel::new(CannedTransport::new(&[None]));
        let started = tokio::time::Instant::now();
        let result = channel.probe(DEFAULT_PROBE_TIMEOUT).await.unwrap();
        assert_eq!(result, LinkResult::Timeout);
        assert!(started.elapsed() <= DEFAULT_PROBE_TIMEOUT + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_stale_output_is_discarded_before_probe() {
        let mut transport = CannedTransport::new(&[Some("ACK")]);
        transport.stale = vec!["Keepalive MQTT enviado".to_string()];
        let mut channel = SerialLinkChannel::new(transport);
        assert_eq!(channel.probe(DEFAULT_PROBE_TIMEOUT).await.unwrap(), LinkResult::Ack);
        assert!(channel.into_inner().stale.is_empty());
    }

    #[tokio::test]
    async fn test_lost_transport_is_an_error_not_a_miss() {
        let mut transport = CannedTransport::new(&[]);
        transport.lost = true;
        let mut channel = SerialLinkChannel::new(transport);
        let err = channel.probe(DEFAULT_PROBE_TIMEOUT).await.unwrap_err();
        assert_eq!(err.endpoint, "canned");
    }
}
