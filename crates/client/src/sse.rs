//! Incremental `text/event-stream` decoding
//!
//! Network chunks do not line up with event boundaries, so bytes are buffered
//! until a blank line completes a frame. Frames with no `data:` field carry
//! nothing for us and are dropped. An incomplete frame may not grow past
//! [`MAX_PENDING_BYTES`].

use thiserror::Error;

/// Largest incomplete frame buffered before the stream is treated as broken
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("event frame exceeded {limit} bytes without a terminating blank line")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// One decoded server-sent event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    /// The `id:` field
    pub id: Option<String>,
    /// The `event:` field
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no blank line
    scanned: usize,
    max_pending: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_pending(MAX_PENDING_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_pending,
        }
    }

    /// Feed a chunk, returning every frame it completes.
    ///
    /// Fails once the unterminated remainder exceeds the pending limit; the
    /// decoder should be discarded with its connection after that.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, FrameTooLarge> {
        // a `\n` at the old end may pair with one at the start of `chunk`
        let mut from = self.scanned.saturating_sub(1);
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer, from) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw[..end])) {
                frames.push(frame);
            }
            from = 0;
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_pending {
            return Err(FrameTooLarge {
                limit: self.max_pending,
            });
        }
        Ok(frames)
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_blank_line(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| pos + from)
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut has_data = false;

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "id" => frame.id = Some(value.to_string()),
            "event" => frame.event = Some(value.to_string()),
            "data" => {
                if has_data {
                    frame.data.push('\n');
                }
                frame.data.push_str(value);
                has_data = true;
            }
            // retry and unknown fields
            _ => {}
        }
    }

    has_data.then_some(frame)
}
