//! Limits for file views and subprocess output

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied by the editor's view manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorLimits {
    /// Maximum number of live views; the oldest is evicted on overflow
    pub max_views: usize,
    /// Lines scanned after a start match when looking for the end pattern
    pub max_search_lines: usize,
    /// Characters shown per line before it is cut with `...`
    pub max_line_length: usize,
    /// Files scanned by a single `search`
    pub max_search_files: usize,
    /// Matches reported by a single `search`
    pub max_search_matches: usize,
    /// Bytes sniffed for a NUL when deciding whether a file is binary
    pub binary_sniff_bytes: usize,
}

impl Default for EditorLimits {
    fn default() -> Self {
        Self {
            max_views: 3,
            max_search_lines: 1000,
            max_line_length: 200,
            max_search_files: 1000,
            max_search_matches: 500,
            binary_sniff_bytes: 8192,
        }
    }
}

/// Limits for process-backed environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessLimits {
    /// Maximum output captured from one command, in bytes
    pub max_output_bytes: usize,
    /// How long shutdown waits for a graceful exit before killing
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 10 * 1024 * 1024, // 10 MiB
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Buffer that keeps at most `limit` bytes and remembers whether it dropped any.
#[derive(Debug, Clone)]
pub(crate) struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    /// An empty buffer holding up to `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `data`, dropping whatever does not fit.
    pub fn write(&mut self, data: &[u8]) {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);

        if to_write < data.len() {
            self.truncated = true;
        }
    }

    /// Decode as UTF-8 (lossy), appending a notice if anything was dropped.
    pub fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buffer).into_owned();
        if self.truncated {
            text.push_str(&format!(
                "\n\n[WARNING: Output truncated at {} bytes]",
                self.limit
            ));
        }
        text
    }
}
