//! Transcript buffer with incremental prompt counting.
//!
//! The buffer accumulates filtered shell output for one command batch. Prompt
//! occurrences are counted incrementally: each update only scans the bytes
//! appended since the previous update (plus a small overlap for a prompt that
//! straddles two reads), so long outputs stay linear.

use memchr::memmem::Finder;

/// Where a prompt occurrence has to sit to be counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptBoundary {
    /// Any non-overlapping occurrence counts.
    #[default]
    Anywhere,

    /// Only occurrences at the start of the buffer or right after a line
    /// break count. Avoids false completions when command output merely
    /// mentions the prompt text.
    LineStart,
}

/// Counts non-overlapping occurrences of a prompt signature.
#[derive(Debug, Clone)]
pub struct PromptCounter {
    finder: Finder<'static>,
    boundary: PromptBoundary,
    count: usize,
    scan_from: usize,
}

impl PromptCounter {
    /// Create a counter for the given prompt signature.
    pub fn new(prompt: &str, boundary: PromptBoundary) -> Self {
        Self {
            finder: Finder::new(prompt.as_bytes()).into_owned(),
            boundary,
            count: 0,
            scan_from: 0,
        }
    }

    /// Rescan `buffer` from where the previous update stopped and return the
    /// running count.
    ///
    /// `buffer` must only ever grow between calls.
    pub fn update(&mut self, buffer: &str) -> usize {
        let needle_len = self.finder.needle().len();
        let bytes = buffer.as_bytes();
        if needle_len == 0 || self.scan_from >= bytes.len() {
            return self.count;
        }

        let mut resume = self.scan_from;
        for pos in self.finder.find_iter(&bytes[self.scan_from..]) {
            let start = self.scan_from + pos;
            if start < resume {
                continue;
            }
            if self.accepts(bytes, start) {
                self.count += 1;
                resume = start + needle_len;
            }
        }

        // A prompt that is cut off at the end of the buffer must be seen again.
        self.scan_from = resume.max(bytes.len().saturating_sub(needle_len - 1));
        self.count
    }

    fn accepts(&self, bytes: &[u8], start: usize) -> bool {
        match self.boundary {
            PromptBoundary::Anywhere => true,
            PromptBoundary::LineStart => {
                start == 0 || matches!(bytes[start - 1], b'\n' | b'\r')
            }
        }
    }

    /// Occurrences counted so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accumulated filtered output for one command batch.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    /// Create an empty transcript buffer.
    pub fn new() -> Self {
        Self {
            text: String::with_capacity(4096),
        }
    }

    /// Append already-filtered text.
    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Get the buffer contents.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Get the current buffer length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.text.clear();
    }
}
