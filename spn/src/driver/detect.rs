//! Prompt auto-detection.

use std::fmt;

use log::{debug, info, warn};
use tokio::time::Instant;

use super::executor::{IDLE_POLL, Reader, drain, is_closed};
use crate::channel::{Strategy, TranscriptBuffer, extract_prompt};
use crate::error::Result;
use crate::transport::{PromptDetection, Shell};

/// Where a detected prompt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOrigin {
    /// Extracted from device output by the given strategy.
    Detected(Strategy),

    /// Extracted, but only as the raw last line of output.
    LowConfidence,

    /// Nothing usable was seen; the configured default was used.
    Default,
}

/// Result of [`Session::find_prompt`](crate::Session::find_prompt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPrompt {
    /// The prompt signature.
    pub prompt: String,

    /// How it was obtained.
    pub origin: PromptOrigin,
}

impl DetectedPrompt {
    /// Whether the prompt came from a real extraction strategy.
    pub fn is_confident(&self) -> bool {
        matches!(self.origin, PromptOrigin::Detected(_))
    }
}

impl fmt::Display for DetectedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt)
    }
}

fn try_extract(buffer: &str) -> Option<DetectedPrompt> {
    let found = extract_prompt(buffer)?;
    let origin = if found.strategy.is_low_confidence() {
        PromptOrigin::LowConfidence
    } else {
        PromptOrigin::Detected(found.strategy)
    };
    Some(DetectedPrompt {
        prompt: found.prompt,
        origin,
    })
}

fn report(detected: DetectedPrompt) -> DetectedPrompt {
    match detected.origin {
        PromptOrigin::Detected(strategy) => {
            info!("Detected prompt {:?} ({})", detected.prompt, strategy)
        }
        PromptOrigin::LowConfidence => warn!(
            "Prompt {:?} taken from the last output line, it may be wrong",
            detected.prompt
        ),
        PromptOrigin::Default => {}
    }
    detected
}

/// Probe the shell for its prompt.
///
/// Never fails on inconclusive output; only transport errors are returned.
pub(crate) async fn detect_prompt<S: Shell>(
    shell: &mut S,
    reader: &mut Reader<'_>,
    policy: &PromptDetection,
) -> Result<DetectedPrompt> {
    // Whatever is still queued (banner, MOTD) would confuse extraction.
    drain(shell, reader, IDLE_POLL, policy.collect).await?;

    debug!("Sending newline to trigger prompt");
    shell.send(b"\n").await?;
    tokio::time::sleep(policy.settle).await;

    let first = drain(shell, reader, IDLE_POLL, policy.collect).await?;
    if let Some(detected) = try_extract(&first) {
        return Ok(report(detected));
    }

    for attempt in 1..=policy.attempts {
        debug!("Prompt detection attempt {}/{}", attempt, policy.attempts);
        match shell.send(b"\n").await {
            Ok(()) => {}
            Err(e) if is_closed(&e) => break,
            Err(e) => return Err(e),
        }

        let mut buffer = TranscriptBuffer::new();
        let deadline = Instant::now() + policy.attempt_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match shell.recv(IDLE_POLL.min(remaining)).await {
                Ok(Some(raw)) => buffer.push_str(&reader.accept(&raw)),
                Ok(None) => {
                    // Idle: the device may be done printing.
                    if let Some(detected) = try_extract(buffer.as_str()) {
                        return Ok(report(detected));
                    }
                }
                Err(e) if is_closed(&e) => break,
                Err(e) => return Err(e),
            }
        }

        buffer.push_str(&reader.finish());
        if let Some(detected) = try_extract(buffer.as_str()) {
            return Ok(report(detected));
        }
    }

    warn!(
        "Could not detect prompt, using default {:?}",
        policy.default_prompt
    );
    Ok(DetectedPrompt {
        prompt: policy.default_prompt.clone(),
        origin: PromptOrigin::Default,
    })
}
