//! Traffic logging
//!
//! Observes chunks flowing through a relay and writes them to a destination as raw
//! bytes or as a hex dump. Chunks are queued to a background writer with `try_send`,
//! so a slow destination drops log records instead of stalling the relay.

use bytes::Bytes;
use log::{debug, error, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::common::ProxyError;
use super::forwarder::Direction;

/// Bytes per hex dump row
const HEX_ROW: usize = 16;

/// Traffic log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Nothing is recorded
    #[default]
    None,
    /// Chunks are written verbatim
    Plain,
    /// Chunks are written as a hex dump
    Hex,
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Plain => write!(f, "plain"),
            Self::Hex => write!(f, "hex"),
        }
    }
}

impl FromStr for LogMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(Self::None),
            "plain" | "string" | "text" => Ok(Self::Plain),
            "hex" => Ok(Self::Hex),
            _ => Err(ProxyError::Config(format!(
                "Invalid log mode: {}. Valid values are: none, plain, hex",
                s
            ))),
        }
    }
}

// Case-insensitive, and accepts the aliases FromStr accepts
impl<'de> Deserialize<'de> for LogMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        LogMode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

struct TrafficRecord {
    session: u64,
    direction: Direction,
    data: Bytes,
}

/// Handle used by relays to record traffic
///
/// Cheap to clone. A disabled logger holds no channel, so observing is a single branch.
#[derive(Clone)]
pub struct TrafficLogger {
    mode: LogMode,
    sender: Option<mpsc::Sender<TrafficRecord>>,
    dropped: Arc<AtomicU64>,
}

impl fmt::Debug for TrafficLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficLogger")
            .field("mode", &self.mode)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Default for TrafficLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TrafficLogger {
    /// A logger that records nothing
    pub fn disabled() -> Self {
        Self {
            mode: LogMode::None,
            sender: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a background writer for `mode` that writes into `writer`
    ///
    /// Must be called from within a Tokio runtime. `LogMode::None` never spawns anything.
    /// The writer task ends once every clone of the returned logger is dropped.
    pub fn spawn<W>(mode: LogMode, writer: W, capacity: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if mode == LogMode::None {
            return Self::disabled();
        }

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_records(mode, receiver, writer));

        Self {
            mode,
            sender: Some(sender),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Configured mode
    pub fn mode(&self) -> LogMode {
        self.mode
    }

    /// Whether chunks are recorded at all
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Number of chunks dropped because the writer could not keep up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record a chunk. Never blocks and never alters `chunk`.
    pub fn observe(&self, session: u64, direction: Direction, chunk: &[u8]) {
        let Some(ref sender) = self.sender else {
            return;
        };

        let record = TrafficRecord {
            session,
            direction,
            data: Bytes::copy_from_slice(chunk),
        };

        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!("Traffic log queue full, {} chunks dropped so far", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn write_records<W>(mode: LogMode, mut receiver: mpsc::Receiver<TrafficRecord>, mut writer: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(record) = receiver.recv().await {
        debug!(
            "[session {}] {}: {} bytes",
            record.session,
            record.direction,
            record.data.len()
        );

        let result = match mode {
            LogMode::Hex => writer.write_all(hex_dump(&record.data).as_bytes()).await,
            _ => writer.write_all(&record.data).await,
        };

        let result = match result {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!("Traffic log writer failed, traffic logging stopped: {}", e);
            return;
        }
    }

    let _ = writer.shutdown().await;
}

/// Render `data` as a hex dump
///
/// Each row holds an 8 digit offset, up to 16 bytes in two groups of eight, and the
/// printable ASCII between `|` characters:
///
/// ```text
/// 00000000  70 69 6e 67                                      |ping|
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (row, chunk) in data.chunks(HEX_ROW).enumerate() {
        let _ = write!(out, "{:08x}  ", row * HEX_ROW);

        for i in 0..HEX_ROW {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }

        out.push('|');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_log_mode_parsing() {
        assert_eq!("none".parse::<LogMode>().unwrap(), LogMode::None);
        assert_eq!("".parse::<LogMode>().unwrap(), LogMode::None);
        assert_eq!("Plain".parse::<LogMode>().unwrap(), LogMode::Plain);
        assert_eq!("string".parse::<LogMode>().unwrap(), LogMode::Plain);
        assert_eq!("HEX".parse::<LogMode>().unwrap(), LogMode::Hex);
        assert!("binary".parse::<LogMode>().is_err());
        assert_eq!(LogMode::Hex.to_string(), "hex");
    }

    #[test]
    fn test_hex_dump_layout() {
        let dump = hex_dump(b"ping");
        assert_eq!(
            dump,
            "00000000  70 69 6e 67                                      |ping|\n"
        );

        let data: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  00 01 02 03 04 05 06 07  08 09"));
        assert!(lines[1].starts_with("00000010  10 11 12 13"));
        assert!(lines[0].ends_with("|................|"));
    }

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_disabled_logger_is_inert() {
        let logger = TrafficLogger::disabled();
        assert!(!logger.is_enabled());
        logger.observe(1, Direction::ClientToUpstream, b"ignored");
        assert_eq!(logger.dropped(), 0);
    }

    #[tokio::test]
    async fn test_none_mode_spawns_nothing() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let logger = TrafficLogger::spawn(LogMode::None, writer, 16);
        assert!(!logger.is_enabled());
        logger.observe(1, Direction::ClientToUpstream, b"secret");

        // the writer was dropped unused, so the reader sees end-of-stream and no data
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_plain_mode_writes_verbatim() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let logger = TrafficLogger::spawn(LogMode::Plain, writer, 16);

        logger.observe(7, Direction::ClientToUpstream, b"hello ");
        logger.observe(7, Direction::UpstreamToClient, b"world");
        drop(logger);

        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        // a tiny pipe that nobody reads stalls the writer task
        let (writer, _reader) = tokio::io::duplex(1);
        let logger = TrafficLogger::spawn(LogMode::Plain, writer, 1);

        for _ in 0..100 {
            logger.observe(1, Direction::ClientToUpstream, b"0123456789");
        }

        assert!(logger.dropped() > 0);
    }
}
