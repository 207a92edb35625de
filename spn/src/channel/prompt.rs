//! Prompt extraction from noisy shell output.
//!
//! Devices answer a bare newline with their prompt, but the buffer usually
//! also holds banner text, echoed input, and on some platforms the same prompt
//! repeated several times in one burst (`switch# switch# switch#`). Extraction
//! runs an ordered chain of small strategies; the first one that produces a
//! candidate wins.

use std::fmt;

/// Characters a prompt commonly ends with.
pub const PROMPT_TERMINATORS: &[char] = &['#', '>', '$', '%', ':', ']', '}', ')', '|'];

/// Terminators used to decide whether a line is the same prompt repeated.
const REPEAT_SPLITTERS: &[char] = &['#', '>', '$', '%', ':'];

/// Terminators tried, in order, when collapsing repetitions. `~]` comes
/// before `]` so bash-style `[user@host ~]` keeps its tilde.
const BASE_TERMINATORS: &[&str] = &["#", ">", "$", "%", ":", "~]", "]", "}", ")", "|"];

/// Lines at least this long are never taken as a clean prompt.
const MAX_CLEAN_PROMPT_LEN: usize = 30;

/// Lines at least this long are skipped by the embedded-terminator scan.
const MAX_EMBEDDED_LINE_LEN: usize = 50;

/// Which heuristic produced a prompt candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Last line is short, ends in a terminator and is not repeated.
    CleanLastLine,
    /// Last line is one prompt repeated several times.
    RepeatedLastLine,
    /// Some earlier line ends in a terminator.
    ReverseScan,
    /// A terminator appears inside a short line.
    EmbeddedTerminator,
    /// Nothing looked like a prompt, the last line is returned as-is.
    LastLine,
}

impl Strategy {
    /// Whether the candidate came from the low-confidence fallback.
    pub fn is_low_confidence(self) -> bool {
        matches!(self, Strategy::LastLine)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::CleanLastLine => "clean-last-line",
            Strategy::RepeatedLastLine => "repeated-last-line",
            Strategy::ReverseScan => "reverse-scan",
            Strategy::EmbeddedTerminator => "embedded-terminator",
            Strategy::LastLine => "last-line",
        };
        f.write_str(name)
    }
}

/// A prompt candidate together with the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPrompt {
    /// The prompt text.
    pub prompt: String,

    /// The heuristic that produced it.
    pub strategy: Strategy,
}

type Matcher = fn(&[&str]) -> Option<String>;

/// The strategy chain, in priority order.
const CHAIN: &[(Strategy, Matcher)] = &[
    (Strategy::CleanLastLine, clean_last_line),
    (Strategy::RepeatedLastLine, repeated_last_line),
    (Strategy::ReverseScan, reverse_scan),
    (Strategy::EmbeddedTerminator, embedded_terminator),
    (Strategy::LastLine, last_line),
];

/// Extract the most likely prompt from filtered shell output.
///
/// Returns `None` only when the buffer has no non-blank line at all.
pub fn extract_prompt(buffer: &str) -> Option<ExtractedPrompt> {
    let lines = non_empty_lines(buffer);
    if lines.is_empty() {
        return None;
    }

    CHAIN.iter().find_map(|(strategy, matcher)| {
        matcher(&lines).map(|prompt| ExtractedPrompt {
            prompt,
            strategy: *strategy,
        })
    })
}

/// Split on `\n`, trim, and drop blank lines.
pub fn non_empty_lines(buffer: &str) -> Vec<&str> {
    buffer
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

fn ends_with_terminator(line: &str) -> bool {
    line.ends_with(PROMPT_TERMINATORS)
}

/// Whether `text` is the same prompt base repeated, e.g. `R1# R1# R1#`.
pub fn is_repeated_prompt(text: &str) -> bool {
    let parts: Vec<&str> = text.split(REPEAT_SPLITTERS).collect();
    if parts.len() <= 2 {
        return false;
    }
    let bases: Vec<&str> = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect();
    bases.len() > 1 && bases.iter().all(|base| *base == bases[0])
}

/// Collapse a repeated prompt to a single instance.
///
/// `device# device# device#` becomes `device#`. Requires at least two
/// identical segments; a line holding a single prompt is not a repetition.
pub fn collapse_repeated_prompt(text: &str) -> Option<String> {
    for terminator in BASE_TERMINATORS {
        if !text.contains(terminator) {
            continue;
        }
        let parts: Vec<&str> = text.split(terminator).collect();
        let bases: Vec<&str> = parts[..parts.len() - 1].iter().map(|p| p.trim()).collect();
        if bases.len() >= 2 && !bases[0].is_empty() && bases.iter().all(|b| *b == bases[0]) {
            return Some(format!("{}{}", bases[0], terminator));
        }
    }

    let tokens: Vec<&str> = text
        .split_whitespace()
        .filter(|token| ends_with_terminator(token))
        .collect();
    if tokens.len() > 1 && tokens.iter().all(|t| *t == tokens[0]) {
        return Some(tokens[0].to_string());
    }

    None
}

fn clean_last_line(lines: &[&str]) -> Option<String> {
    let last = lines.last()?;
    (ends_with_terminator(last)
        && last.chars().count() < MAX_CLEAN_PROMPT_LEN
        && !is_repeated_prompt(last))
    .then(|| last.to_string())
}

fn repeated_last_line(lines: &[&str]) -> Option<String> {
    collapse_repeated_prompt(lines.last()?)
}

fn reverse_scan(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find(|line| ends_with_terminator(line))
        .map(|line| collapse_repeated_prompt(line).unwrap_or_else(|| line.to_string()))
}

fn embedded_terminator(lines: &[&str]) -> Option<String> {
    for line in lines.iter().rev() {
        if line.chars().count() >= MAX_EMBEDDED_LINE_LEN {
            continue;
        }
        for terminator in BASE_TERMINATORS {
            if !line.contains(terminator) {
                continue;
            }
            let parts: Vec<&str> = line.split(terminator).collect();
            if parts.len() > 1 && parts[parts.len() - 1].trim().is_empty() {
                let mut base = parts[0].trim().to_string();
                for part in &parts[1..parts.len() - 1] {
                    base.push_str(terminator);
                    base.push_str(part.trim());
                }
                base.push_str(terminator);
                return Some(base);
            }
        }
    }
    None
}

fn last_line(lines: &[&str]) -> Option<String> {
    lines.last().map(|line| line.to_string())
}
