//! ---
//! ems_section: "04-simulation-supervision"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded capture of simulation stdout and stderr."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// One line emitted by the simulation process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
    pub at: DateTime<Utc>,
}

/// Ring of the most recent output lines.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: Mutex<VecDeque<OutputLine>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn push(&self, stream: OutputStream, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(OutputLine {
            stream,
            line: line.into(),
            at: Utc::now(),
        });
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy a child stream into the operational log and the ring until EOF.
///
/// Bytes are decoded lossily; a read error ends the capture but is never
/// propagated.
pub(crate) async fn forward_output<R>(
    reader: R,
    stream: OutputStream,
    buffer: Arc<OutputBuffer>,
    pid: Option<u32>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);
                info!(target: "pvw::simulation", pid, stream = stream.as_str(), "{line}");
                buffer.push(stream, line);
            }
            Err(err) => {
                warn!(pid, ?stream, error = %err, "stopped capturing simulation output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_latest_lines() {
        let buffer = OutputBuffer::new(2);
        buffer.push(OutputStream::Stdout, "one");
        buffer.push(OutputStream::Stderr, "two");
        buffer.push(OutputStream::Stdout, "three");

        let lines: Vec<_> = buffer.lines().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["two", "three"]);
        assert_eq!(buffer.len(), 2);
        assert!(OutputBuffer::new(0).is_empty());
    }

    #[tokio::test]
    async fn forwarding_tolerates_invalid_utf8_and_missing_newline() {
        let buffer = Arc::new(OutputBuffer::new(8));
        let input: &[u8] = b"ok\r\n\xff\xfebad\nlast";
        forward_output(input, OutputStream::Stdout, Arc::clone(&buffer), None).await;

        let lines: Vec<_> = buffer.lines().into_iter().map(|l| l.line).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with("bad"));
        assert_eq!(lines[2], "last");
    }
}
