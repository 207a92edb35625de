//! Result types for command execution.

use std::fmt;
use std::time::Duration;

/// How a batch execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The expected number of prompts was seen.
    Prompts { found: usize, expected: usize },

    /// The prompt timeout elapsed first. The transcript is partial.
    TimedOut { found: usize, expected: usize },

    /// The device closed the shell before all prompts were seen.
    Closed { found: usize, expected: usize },

    /// No prompt signature was known; output was collected after a fixed delay.
    Delay,

    /// Commands ran as exec requests.
    Exec,
}

impl Completion {
    /// Whether the batch is known to have finished.
    ///
    /// Fixed-delay collection is reported as complete since nothing better is
    /// known about it.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Completion::Prompts { .. } | Completion::Delay | Completion::Exec
        )
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Prompts { found, expected } => {
                write!(f, "complete ({}/{} prompts)", found, expected)
            }
            Completion::TimedOut { found, expected } => {
                write!(f, "timed out ({}/{} prompts)", found, expected)
            }
            Completion::Closed { found, expected } => {
                write!(f, "shell closed ({}/{} prompts)", found, expected)
            }
            Completion::Delay => f.write_str("collected after fixed delay"),
            Completion::Exec => f.write_str("exec"),
        }
    }
}

/// Output of one batch execution.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Filtered output of the whole batch.
    pub output: String,

    /// Time taken from the first send to the last read.
    pub elapsed: Duration,

    /// How collection ended.
    pub completion: Completion,
}

impl Transcript {
    /// Create a transcript.
    pub fn new(output: impl Into<String>, elapsed: Duration, completion: Completion) -> Self {
        Self {
            output: output.into(),
            elapsed,
            completion,
        }
    }

    /// Whether every expected prompt was seen.
    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    /// Get the output lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }

    /// Check if the output contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.output.contains(pattern)
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_flags() {
        assert!(Completion::Prompts { found: 2, expected: 2 }.is_complete());
        assert!(!Completion::TimedOut { found: 1, expected: 2 }.is_complete());
        assert!(!Completion::Closed { found: 0, expected: 1 }.is_complete());
        assert!(Completion::Delay.is_complete());
    }

    #[test]
    fn test_display() {
        let t = Transcript::new(
            "R1#",
            Duration::ZERO,
            Completion::TimedOut { found: 1, expected: 3 },
        );
        assert_eq!(t.to_string(), "R1#");
        assert_eq!(t.completion.to_string(), "timed out (1/3 prompts)");
    }
}
