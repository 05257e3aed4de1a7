use std::io::{self, Write};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::FrameFormat;
use crate::telemetry::{StatusReport, TelemetryFrame};

/// Destination for emitted frames.
///
/// Uses enum dispatch so the aggregator's hot path calls a concrete method
/// rather than going through a trait object.
pub enum FrameSink {
    Console(ConsoleSink),
    Channel(ChannelSink),
}

impl FrameSink {
    /// Console sink on stdout with the given line format.
    pub fn stdout(format: FrameFormat) -> Self {
        Self::Console(ConsoleSink::stdout(format))
    }

    /// In-process sink delivering frames to a receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TelemetryFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Channel(ChannelSink { tx }), rx)
    }

    /// Returns the sink name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Console(_) => "console",
            Self::Channel(_) => "channel",
        }
    }

    /// Emit a frame. Output failures are logged, never propagated.
    pub fn emit(&mut self, frame: &TelemetryFrame) {
        match self {
            Self::Console(s) => s.write_frame(frame),
            Self::Channel(s) => s.send(frame),
        }
    }
}

/// Writes one line per frame to a byte stream.
pub struct ConsoleSink {
    format: FrameFormat,
    out: Box<dyn Write + Send>,
}

impl ConsoleSink {
    pub fn new(format: FrameFormat, out: Box<dyn Write + Send>) -> Self {
        Self { format, out }
    }

    pub fn stdout(format: FrameFormat) -> Self {
        Self::new(format, Box::new(io::stdout()))
    }

    /// Write a frame line.
    pub fn write_frame(&mut self, frame: &TelemetryFrame) {
        let result = match self.format {
            FrameFormat::Text => writeln!(self.out, "{frame}"),
            FrameFormat::Json => write_json_line(&mut self.out, frame),
        };
        if let Err(e) = result.and_then(|()| self.out.flush()) {
            warn!(frame_id = frame.frame_id, error = %e, "writing frame failed");
        }
    }

    /// Write a status line.
    pub fn write_status(&mut self, status: &StatusReport) {
        let result = match self.format {
            FrameFormat::Text => writeln!(self.out, "{status}"),
            FrameFormat::Json => write_json_line(&mut self.out, status),
        };
        if let Err(e) = result.and_then(|()| self.out.flush()) {
            warn!(error = %e, "writing status failed");
        }
    }
}

/// Writes the value and its newline in a single call so concurrent writers
/// sharing stdout never interleave within a line.
fn write_json_line<T: serde::Serialize>(out: &mut dyn Write, value: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(value).map_err(io::Error::from)?;
    line.push(b'\n');
    out.write_all(&line)
}

/// Forwards frames over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryFrame>,
}

impl ChannelSink {
    fn send(&self, frame: &TelemetryFrame) {
        if self.tx.send(*frame).is_err() {
            debug!(frame_id = frame.frame_id, "frame receiver closed, dropping frame");
        }
    }
}
