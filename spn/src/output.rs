//! Transcript output.
//!
//! Filtered shell output goes to up to two places: an interactive writer
//! (usually stdout) that gets the text exactly as received, and a transcript
//! file that gets the same text with carriage returns normalised to `\n`.
//! Failing to write the file is logged and never interrupts the session.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// Collapses `\r\n` and lone `\r` to `\n`, across chunk boundaries.
#[derive(Debug, Default, Clone)]
pub struct LineEndingNormalizer {
    after_cr: bool,
}

impl LineEndingNormalizer {
    /// Create a normalizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise one chunk.
    pub fn normalize(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                '\r' => {
                    out.push('\n');
                    self.after_cr = true;
                }
                '\n' if self.after_cr => self.after_cr = false,
                _ => {
                    out.push(ch);
                    self.after_cr = false;
                }
            }
        }
        out
    }
}

struct TranscriptWriter {
    /// File behind the writer, when there is one.
    path: Option<PathBuf>,
    writer: Box<dyn Write + Send>,
    normalizer: LineEndingNormalizer,
}

impl TranscriptWriter {
    fn label(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "transcript writer".to_string(),
        }
    }
}

/// Dual-destination writer for shell output.
pub struct OutputSink {
    interactive: Option<Box<dyn Write + Send>>,
    file: Option<TranscriptWriter>,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("interactive", &self.interactive.is_some())
            .field("file", &self.file.as_ref().map(TranscriptWriter::label))
            .finish()
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::none()
    }
}

impl OutputSink {
    /// A sink that discards everything.
    pub fn none() -> Self {
        Self {
            interactive: None,
            file: None,
        }
    }

    /// A sink that streams to stdout.
    pub fn stdout() -> Self {
        Self::none().with_interactive(Box::new(io::stdout()))
    }

    /// Stream output verbatim to `writer`.
    pub fn with_interactive(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.interactive = Some(writer);
        self
    }

    /// Also write a normalised transcript to `path`.
    ///
    /// Missing parent directories are created. With `append` the file is
    /// extended, otherwise it is truncated.
    pub fn with_file(mut self, path: impl AsRef<Path>, append: bool) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        debug!("Writing transcript to {}", path.display());
        self.file = Some(TranscriptWriter {
            path: Some(path.to_path_buf()),
            writer: Box::new(BufWriter::new(file)),
            normalizer: LineEndingNormalizer::new(),
        });
        Ok(self)
    }

    /// Write the normalised transcript to `writer` instead of a file.
    pub fn with_transcript(mut self, writer: Box<dyn Write + Send>) -> Self {
        self.file = Some(TranscriptWriter {
            path: None,
            writer,
            normalizer: LineEndingNormalizer::new(),
        });
        self
    }

    /// Whether any destination is configured.
    pub fn is_active(&self) -> bool {
        self.interactive.is_some() || self.file.is_some()
    }

    /// Path of the transcript file, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().and_then(|file| file.path.as_deref())
    }

    /// Write one chunk of filtered output to every destination.
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        if let Some(writer) = self.interactive.as_mut() {
            if let Err(e) = writer.write_all(text.as_bytes()).and_then(|_| writer.flush()) {
                warn!("Failed to write interactive output: {}", e);
            }
        }

        if let Some(file) = self.file.as_mut() {
            let normalized = file.normalizer.normalize(text);
            if let Err(e) = file.writer.write_all(normalized.as_bytes()) {
                warn!("Failed to write {}, disabling it: {}", file.label(), e);
                self.file = None;
            }
        }
    }

    /// Flush both destinations.
    pub fn flush(&mut self) {
        if let Some(writer) = self.interactive.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush interactive output: {}", e);
            }
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.writer.flush() {
                warn!("Failed to flush {}: {}", file.label(), e);
            }
        }
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_normalizer_handles_split_crlf() {
        let mut n = LineEndingNormalizer::new();
        let mut out = n.normalize("line1\r");
        out.push_str(&n.normalize("\nline2\rline3\r\n"));
        assert_eq!(out, "line1\nline2\nline3\n");
    }

    #[test]
    fn test_normalizer_keeps_blank_lines() {
        let mut n = LineEndingNormalizer::new();
        assert_eq!(n.normalize("a\n\nb\r\n\r\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn test_interactive_verbatim_file_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/r1.txt");
        let captured = Captured::default();

        let mut sink = OutputSink::none()
            .with_interactive(Box::new(captured.clone()))
            .with_file(&path, false)
            .unwrap();
        sink.write("show clock\r\n12:00\r");
        sink.write("\nR1#");
        drop(sink);

        assert_eq!(captured.text(), "show clock\r\n12:00\r\nR1#");
        assert_eq!(fs::read_to_string(&path).unwrap(), "show clock\n12:00\nR1#");
    }

    #[test]
    fn test_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "previous\n").unwrap();

        let mut sink = OutputSink::none().with_file(&path, true).unwrap();
        sink.write("next\r\n");
        drop(sink);
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous\nnext\n");

        let mut sink = OutputSink::none().with_file(&path, false).unwrap();
        sink.write("fresh");
        drop(sink);
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");
    }

    /// Transcript writer whose disk is full from the start.
    #[derive(Clone, Default)]
    struct Full(Arc<Mutex<u32>>);

    impl Write for Full {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            *self.0.lock().unwrap() += 1;
            Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_transcript_failure_keeps_interactive_output() {
        let captured = Captured::default();
        let full = Full::default();

        let mut sink = OutputSink::none()
            .with_interactive(Box::new(captured.clone()))
            .with_transcript(Box::new(full.clone()));
        sink.write("show ver\r\n");
        sink.write("IOS 15.2\r\n");
        sink.write("R1#");
        sink.flush();

        assert_eq!(captured.text(), "show ver\r\nIOS 15.2\r\nR1#");
        assert_eq!(*full.0.lock().unwrap(), 1);
        assert!(sink.is_active());
    }

    #[test]
    fn test_none_is_inactive() {
        let mut sink = OutputSink::none();
        assert!(!sink.is_active());
        sink.write("ignored");
    }
}
