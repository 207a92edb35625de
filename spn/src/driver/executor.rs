//! The prompt-counting protocol.
//!
//! A batch is sent in full first, then output is read until the prompt has
//! been seen once per command. Devices print exactly one prompt after each
//! line they process, so the count is a reliable completion signal even when
//! the output itself is arbitrary text.

use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::time::Instant;

use super::command::CommandBatch;
use super::response::Completion;
use crate::channel::{PromptBoundary, PromptCounter, StreamFilter, TranscriptBuffer, filter_text};
use crate::error::{ChannelError, Error, Result};
use crate::output::OutputSink;
use crate::transport::{Shell, Transport};

/// Idle gap that ends a drain.
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(100);

/// Shared reader state for one shell.
pub(crate) struct Reader<'a> {
    pub(crate) filter: &'a mut StreamFilter,
    pub(crate) sink: &'a mut OutputSink,
}

impl Reader<'_> {
    /// Filter a raw chunk and forward it to the sink.
    pub(crate) fn accept(&mut self, raw: &[u8]) -> String {
        let text = self.filter.push(raw);
        self.sink.write(&text);
        text
    }

    /// Release whatever the filter is holding back and forward it too.
    pub(crate) fn finish(&mut self) -> String {
        let text = self.filter.finish();
        self.sink.write(&text);
        text
    }
}

pub(crate) fn is_closed(err: &Error) -> bool {
    matches!(err, Error::Channel(ChannelError::Closed))
}

/// Send every command of the batch, pausing between two sends.
pub(crate) async fn send_batch<S: Shell>(
    shell: &mut S,
    batch: &CommandBatch,
    inter_command_delay: Duration,
) -> Result<()> {
    let total = batch.len();
    for (i, command) in batch.iter().enumerate() {
        debug!("Sending {}/{}: {}", i + 1, total, command);
        shell.send(command.wire().as_bytes()).await?;
        if i + 1 < total && !inter_command_delay.is_zero() {
            tokio::time::sleep(inter_command_delay).await;
        }
    }
    Ok(())
}

/// Read until `expected` prompt occurrences were seen or `timeout` elapses.
pub(crate) async fn count_prompts<S: Shell>(
    shell: &mut S,
    reader: &mut Reader<'_>,
    prompt: &str,
    boundary: PromptBoundary,
    expected: usize,
    timeout: Duration,
) -> Result<(String, Completion)> {
    let mut buffer = TranscriptBuffer::new();
    let mut counter = PromptCounter::new(prompt, boundary);
    let deadline = Instant::now() + timeout;

    debug!("Waiting for {} occurrence(s) of {:?}", expected, prompt);

    let mut found = 0;
    while found < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match shell.recv(remaining).await {
            Ok(Some(raw)) => {
                let text = reader.accept(&raw);
                buffer.push_str(&text);
                let count = counter.update(buffer.as_str());
                if count > found {
                    found = count;
                    trace!("Prompt seen {}/{}", found, expected);
                }
            }
            Ok(None) => break,
            Err(e) if is_closed(&e) => {
                buffer.push_str(&reader.finish());
                warn!("Shell closed after {}/{} prompts", found, expected);
                return Ok((buffer.take(), Completion::Closed { found, expected }));
            }
            Err(e) => return Err(e),
        }
    }

    let completion = if found >= expected {
        info!("Batch complete: {}/{} prompts", found, expected);
        Completion::Prompts { found, expected }
    } else {
        buffer.push_str(&reader.finish());
        warn!(
            "Timed out after {:?} with {}/{} prompts",
            timeout, found, expected
        );
        Completion::TimedOut { found, expected }
    };
    Ok((buffer.take(), completion))
}

/// Read whatever arrives until the shell has been quiet for `idle`, bounded
/// by `limit` overall.
pub(crate) async fn drain<S: Shell>(
    shell: &mut S,
    reader: &mut Reader<'_>,
    idle: Duration,
    limit: Duration,
) -> Result<String> {
    let mut buffer = TranscriptBuffer::new();
    let deadline = Instant::now() + limit;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match shell.recv(idle.min(remaining)).await {
            Ok(Some(raw)) => buffer.push_str(&reader.accept(&raw)),
            Ok(None) => break,
            Err(e) if is_closed(&e) => {
                debug!("Shell closed while draining");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    buffer.push_str(&reader.finish());
    Ok(buffer.take())
}

/// Fixed-delay fallback: wait `shell_timeout`, then take what is there.
pub(crate) async fn collect_after_delay<S: Shell>(
    shell: &mut S,
    reader: &mut Reader<'_>,
    shell_timeout: Duration,
) -> Result<String> {
    debug!("No prompt signature, waiting {:?}", shell_timeout);
    tokio::time::sleep(shell_timeout).await;
    drain(shell, reader, IDLE_POLL, shell_timeout.max(IDLE_POLL)).await
}

/// Run every command line as its own exec request. Bare newlines are skipped.
pub(crate) async fn run_exec<T: Transport>(
    transport: &mut T,
    batch: &CommandBatch,
    sink: &mut OutputSink,
) -> Result<String> {
    let mut output = String::new();

    for text in batch.iter().filter_map(|c| c.text()) {
        debug!("exec: {}", text);
        let result = transport.exec(text).await?;

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stdout = filter_text(&stdout);
        sink.write(&stdout);
        output.push_str(&stdout);

        if !result.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = filter_text(&stderr);
            warn!("{} wrote to stderr: {}", text, stderr.trim_end());
            sink.write(&stderr);
            output.push_str(&stderr);
        }

        match result.exit_status {
            Some(0) | None => {}
            Some(status) => debug!("{} exited with status {}", text, status),
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockDevice;
    use crate::transport::{Connector, SessionConfig};
    use crate::{Route, SessionBuilder};

    async fn shell_for(device: &MockDevice) -> crate::transport::testing::MockShell {
        let config: SessionConfig = SessionBuilder::new("r1")
            .username("admin")
            .password("pw")
            .build_config()
            .unwrap();
        let mut transport = device.connector().connect(&config, Route::Direct).await.unwrap();
        transport.open_shell(80, 24).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_prompts_across_chunks() {
        let device = MockDevice::new().on_send_chunks(
            "show ver\n",
            &[
                (Duration::from_millis(10), "show ver\r\nIOS 15\r\nR"),
                (Duration::from_millis(10), "1#"),
            ],
        );
        let mut shell = shell_for(&device).await;
        let mut filter = StreamFilter::new();
        let mut sink = OutputSink::none();
        let mut reader = Reader {
            filter: &mut filter,
            sink: &mut sink,
        };

        send_batch(&mut shell, &CommandBatch::from("show ver"), Duration::ZERO)
            .await
            .unwrap();
        let (output, completion) = count_prompts(
            &mut shell,
            &mut reader,
            "R1#",
            PromptBoundary::Anywhere,
            1,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::Prompts { found: 1, expected: 1 });
        assert!(output.ends_with("R1#"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial() {
        let device = MockDevice::new().on_send("a\n", "a\r\nR1#");
        let mut shell = shell_for(&device).await;
        let mut filter = StreamFilter::new();
        let mut sink = OutputSink::none();
        let mut reader = Reader {
            filter: &mut filter,
            sink: &mut sink,
        };

        let batch = CommandBatch::from_commands(["a", "b"]);
        send_batch(&mut shell, &batch, Duration::ZERO).await.unwrap();
        let start = Instant::now();
        let (output, completion) = count_prompts(
            &mut shell,
            &mut reader,
            "R1#",
            PromptBoundary::Anywhere,
            2,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::TimedOut { found: 1, expected: 2 });
        assert_eq!(output, "a\r\nR1#");
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_held_back_bytes() {
        let device = MockDevice::new().on_send_bytes("show ver\n", b"show ver\r\nuptime 3 d\xc3");
        let mut shell = shell_for(&device).await;
        let mut filter = StreamFilter::new();
        let mut sink = OutputSink::none();
        let mut reader = Reader {
            filter: &mut filter,
            sink: &mut sink,
        };

        send_batch(&mut shell, &CommandBatch::from("show ver"), Duration::ZERO)
            .await
            .unwrap();
        let (output, completion) = count_prompts(
            &mut shell,
            &mut reader,
            "R1#",
            PromptBoundary::Anywhere,
            1,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::TimedOut { found: 0, expected: 1 });
        assert_eq!(output, "show ver\r\nuptime 3 d\u{FFFD}");
        assert_eq!(filter.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_command_delay_between_sends_only() {
        let device = MockDevice::new();
        let mut shell = shell_for(&device).await;
        let batch = CommandBatch::from_commands(["a", "b", "c"]);

        let start = Instant::now();
        send_batch(&mut shell, &batch, Duration::from_secs(1)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(device.sent(), "a\nb\nc\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_shell_reported() {
        let device = MockDevice::new().on_send_then_close("exit\n", "exit\r\n");
        let mut shell = shell_for(&device).await;
        let mut filter = StreamFilter::new();
        let mut sink = OutputSink::none();
        let mut reader = Reader {
            filter: &mut filter,
            sink: &mut sink,
        };

        send_batch(&mut shell, &CommandBatch::from("exit"), Duration::ZERO)
            .await
            .unwrap();
        let (_, completion) = count_prompts(
            &mut shell,
            &mut reader,
            "R1#",
            PromptBoundary::Anywhere,
            1,
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert_eq!(completion, Completion::Closed { found: 0, expected: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fallback_sleeps_then_drains() {
        let device = MockDevice::new().on_send_delayed("show ver\n", Duration::from_secs(1), "v1\r\n");
        let mut shell = shell_for(&device).await;
        let mut filter = StreamFilter::new();
        let mut sink = OutputSink::none();
        let mut reader = Reader {
            filter: &mut filter,
            sink: &mut sink,
        };

        send_batch(&mut shell, &CommandBatch::from("show ver"), Duration::ZERO)
            .await
            .unwrap();
        let start = Instant::now();
        let output = collect_after_delay(&mut shell, &mut reader, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(output, "v1\r\n");
    }
}
