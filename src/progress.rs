//! Ingestion progress sinks.
//!
//! The file and git sync engines report human-readable lines ("files
//! 12 / 340", "skipped src/big.bin: too large") through an [`IngestLogger`].
//! Queued jobs forward lines over a channel to whoever is watching; direct
//! CLI runs write to **stderr** so stdout stays parseable.
//!
//! Logging never fails the job. A channel whose receiver has gone away
//! silently discards further lines.

use std::io::Write;

use tokio::sync::mpsc;

/// Receives progress lines from an ingestion run.
pub trait IngestLogger: Send + Sync {
    fn log(&self, line: &str);
}

/// Writes each line to stderr.
pub struct StderrLogger;

impl IngestLogger for StderrLogger {
    fn log(&self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

/// Forwards lines over an unbounded channel.
pub struct ChannelLogger {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelLogger {
    /// A logger paired with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl IngestLogger for ChannelLogger {
    fn log(&self, line: &str) {
        // A closed receiver means nobody is listening any more.
        let _ = self.tx.send(line.to_string());
    }
}

/// Discards everything.
pub struct NoLogger;

impl IngestLogger for NoLogger {
    fn log(&self, _line: &str) {}
}

/// "label  n / total" progress line, emitted every `every` items and at the end.
pub(crate) fn progress_line(label: &str, n: u64, total: u64, every: u64) -> Option<String> {
    if total == 0 || (n % every.max(1) != 0 && n != total) {
        return None;
    }
    Some(format!(
        "{}  {} / {}",
        label,
        format_number(n),
        format_number(total)
    ))
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_lines_are_throttled() {
        assert_eq!(progress_line("files", 1, 30, 10), None);
        assert_eq!(progress_line("files", 10, 30, 10).as_deref(), Some("files  10 / 30"));
        assert_eq!(progress_line("files", 30, 30, 25).as_deref(), Some("files  30 / 30"));
        assert_eq!(progress_line("files", 0, 0, 10), None);
    }

    #[test]
    fn channel_logger_survives_dropped_receiver() {
        let (logger, rx) = ChannelLogger::channel();
        logger.log("first");
        drop(rx);
        logger.log("second");
    }

    #[tokio::test]
    async fn channel_logger_forwards_lines() {
        let (logger, mut rx) = ChannelLogger::channel();
        logger.log("hello");
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }
}
