//! Point-to-point serial link: one sender, one receiver, no acknowledgement.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::codec::{FrameReader, decode, encode};
use crate::record::Record;

/// Serial device the sender writes to by default.
pub const DEFAULT_SEND_DEVICE: &str = "/dev/ttyAMA0";
/// Serial device the receiver reads from by default.
pub const DEFAULT_RECEIVE_DEVICE: &str = "/dev/ttyAMA1";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Pause after a failed port read before the next attempt.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("failed to open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
}

/// Line settings for the serial link (always 8N1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    /// Upper bound on a single blocking read.
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn open(&self) -> Result<Box<dyn serialport::SerialPort>, LinkError> {
        serialport::new(&self.device, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|source| LinkError::Open {
                device: self.device.clone(),
                source,
            })
    }
}

/// Encodes and writes one record. Returns the number of bytes sent.
pub fn send_record<W: Write + ?Sized>(port: &mut W, record: &Record) -> io::Result<usize> {
    let frame = encode(record);
    port.write_all(&frame)?;
    port.flush()?;
    Ok(frame.len())
}

/// Reads at most one frame and decodes it.
///
/// `Ok(None)` covers both "nothing arrived before the timeout" and "a
/// malformed frame was received and dropped".
pub fn receive_record<R: Read>(reader: &mut FrameReader<R>) -> io::Result<Option<Record>> {
    let Some(frame) = reader.read_frame()? else {
        return Ok(None);
    };
    match decode(reader.schema(), &frame) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            debug!("Skipping malformed frame: {}", e);
            Ok(None)
        }
    }
}

/// Receiving end of the link, polled once per tick.
///
/// Port errors other than timeouts (e.g. the adapter was unplugged) are
/// warned about once per failure episode and followed by a cancellable
/// back-off, so a dead port neither floods the log nor spins the loop.
pub struct LinkReceiver<R> {
    reader: FrameReader<R>,
    backoff: Duration,
    failing: bool,
}

impl<R: Read> LinkReceiver<R> {
    pub fn new(reader: FrameReader<R>) -> Self {
        Self {
            reader,
            backoff: DEFAULT_ERROR_BACKOFF,
            failing: false,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn reader(&self) -> &FrameReader<R> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut FrameReader<R> {
        &mut self.reader
    }

    /// `true` while the port keeps failing.
    pub fn is_failing(&self) -> bool {
        self.failing
    }

    /// Reads at most one record; see `receive_record`.
    pub fn poll(&mut self, cancel: &CancellationToken) -> Option<Record> {
        match receive_record(&mut self.reader) {
            Ok(record) => {
                if self.failing {
                    info!("Serial link recovered");
                    self.failing = false;
                }
                record
            }
            Err(e) => {
                if self.failing {
                    debug!("Serial read still failing: {}", e);
                } else {
                    warn!("Serial read failed: {}", e);
                    self.failing = true;
                }
                cancel.sleep(self.backoff);
                None
            }
        }
    }
}
