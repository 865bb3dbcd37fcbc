use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::dbgp::StreamKind;
use crate::viewer::ViewerEvent;
use crate::Result;

const LINE_SEPARATOR: &str = "\r\n";

/// Buffers stdout/stderr fragments until the current engine response has been
/// fully processed.
#[derive(Debug, Default)]
pub struct OutputAggregator {
    stdout: String,
    stderr: String,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: StreamKind, fragment: &str, base64: bool) -> Result<()> {
        let text = if base64 {
            let bytes = BASE64.decode(fragment.trim())?;
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            fragment.to_string()
        };

        let normalized = normalize_line_endings(text.trim());
        let buffer = match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        buffer.push_str(&normalized);
        buffer.push_str(LINE_SEPARATOR);
        Ok(())
    }

    /// Drains both buffers into at most one event each.
    pub fn flush(&mut self) -> Vec<ViewerEvent> {
        let mut events = Vec::new();
        if !self.stdout.is_empty() {
            events.push(ViewerEvent::ReplStdout(std::mem::take(&mut self.stdout)));
        }
        if !self.stderr.is_empty() {
            events.push(ViewerEvent::ReplError(std::mem::take(&mut self.stderr)));
        }
        events
    }

    pub fn clear(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', LINE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_fragment_round_trip() {
        let mut output = OutputAggregator::new();
        output.push(StreamKind::Stdout, "SGVsbG8=", true).unwrap();
        assert_eq!(output.flush(), vec![ViewerEvent::ReplStdout("Hello\r\n".to_string())]);
        assert!(output.is_empty());
    }

    #[test]
    fn test_fragments_in_one_cycle_flush_once() {
        let mut output = OutputAggregator::new();
        output.push(StreamKind::Stdout, "SGVsbG8=", true).unwrap();
        output.push(StreamKind::Stdout, " world \n", false).unwrap();
        assert_eq!(
            output.flush(),
            vec![ViewerEvent::ReplStdout("Hello\r\nworld\r\n".to_string())]
        );
        assert!(output.flush().is_empty());
    }

    #[test]
    fn test_line_endings_are_normalized() {
        let mut output = OutputAggregator::new();
        output.push(StreamKind::Stderr, "a\nb\r\nc", false).unwrap();
        assert_eq!(
            output.flush(),
            vec![ViewerEvent::ReplError("a\r\nb\r\nc\r\n".to_string())]
        );
    }

    #[test]
    fn test_stdout_and_stderr_are_separate() {
        let mut output = OutputAggregator::new();
        output.push(StreamKind::Stderr, "warn", false).unwrap();
        output.push(StreamKind::Stdout, "out", false).unwrap();
        assert_eq!(
            output.flush(),
            vec![
                ViewerEvent::ReplStdout("out\r\n".to_string()),
                ViewerEvent::ReplError("warn\r\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_base64_leaves_buffers_untouched() {
        let mut output = OutputAggregator::new();
        assert!(output.push(StreamKind::Stdout, "%%%", true).is_err());
        assert!(output.is_empty());
    }
}
