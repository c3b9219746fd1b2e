//! Incremental fragmenting of streamed response text.
//!
//! Generation tokens are folded into a buffer and released as fragments
//! suitable for synthesis: a fragment ends at a sentence or clause boundary
//! once it reaches a minimum length, and is force-split at a maximum length
//! so a long run-on never stalls playback.

use crate::config::ChunkerConfig;

fn is_boundary_char(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ',' | ';' | ':')
}

/// Streaming text fragmenter. Feed with [`push`](Self::push) as generation
/// chunks arrive, then [`flush`](Self::flush) when the stream ends.
#[derive(Debug)]
pub struct SentenceChunker {
    min_chars: usize,
    max_chars: usize,
    buffer: String,
}

impl SentenceChunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            min_chars: config.min_fragment_chars,
            max_chars: config.max_fragment_chars,
            buffer: String::new(),
        }
    }

    /// Append streamed text and return any fragments now ready, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        if self.buffer.is_empty() {
            self.buffer.push_str(text.trim_start());
        } else {
            self.buffer.push_str(text);
        }
        let mut out = Vec::new();
        while let Some(fragment) = self.take_fragment() {
            out.push(fragment);
        }
        out
    }

    /// Release whatever remains in the buffer as a final fragment.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Find the byte offset (exclusive) at which a fragment can be cut, or
    /// `None` if more text is needed.
    fn find_split(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        let mut count = 0usize;
        let mut last_whitespace: Option<usize> = None;

        while let Some((idx, c)) = chars.next() {
            count += 1;
            if count >= self.min_chars
                && is_boundary_char(c)
                && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
            {
                return Some(idx + c.len_utf8());
            }
            if c.is_whitespace() {
                last_whitespace = Some(idx);
            }
            if count >= self.max_chars {
                // Run-on with no boundary: cut at the last word break,
                // or mid-word if there is none.
                return Some(last_whitespace.unwrap_or(idx + c.len_utf8()));
            }
        }
        None
    }

    fn take_fragment(&mut self) -> Option<String> {
        let split = self.find_split()?;
        let fragment: String = self.buffer.drain(..split).collect();
        let remainder = self.buffer.trim_start().len();
        let leading = self.buffer.len() - remainder;
        self.buffer.drain(..leading);

        let fragment = fragment.trim().to_string();
        debug_assert!(!fragment.is_empty());
        Some(fragment)
    }
}
