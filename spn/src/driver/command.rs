//! Command batches.
//!
//! A batch is everything sent to the device in one [`execute`] call. Each
//! entry produces exactly one prompt when the device is done with it, which
//! is what makes the expected prompt count derivable from the batch.
//!
//! [`execute`]: crate::Session::execute

use std::fmt;

/// Literal marker accepted in command lists for a bare newline.
pub const NEWLINE_MARKER: &str = "\\n";

/// One entry of a command batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A command line, sent followed by `\n`.
    Line(String),

    /// A bare newline, typically used to make the device print its prompt
    /// once more after the last command.
    Newline,
}

impl Command {
    /// Build a command from user text. Empty text, `\n` and the literal
    /// `\n` marker all become [`Command::Newline`].
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == NEWLINE_MARKER || text == "\n" {
            Command::Newline
        } else {
            Command::Line(trimmed.to_string())
        }
    }

    /// Bytes written to the shell for this entry.
    pub fn wire(&self) -> String {
        match self {
            Command::Line(text) => format!("{}\n", text),
            Command::Newline => "\n".to_string(),
        }
    }

    /// Whether this is a bare newline.
    pub fn is_newline(&self) -> bool {
        matches!(self, Command::Newline)
    }

    /// The command text, `None` for a bare newline.
    pub fn text(&self) -> Option<&str> {
        match self {
            Command::Line(text) => Some(text),
            Command::Newline => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Line(text) => f.write_str(text),
            Command::Newline => f.write_str("<newline>"),
        }
    }
}

/// Ordered commands sent in one execution, with an optional disable-paging
/// prelude at the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<Command>,
    prelude_len: usize,
}

impl CommandBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from individual command strings.
    pub fn from_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            commands: commands
                .into_iter()
                .map(|c| Command::parse(c.as_ref()))
                .collect(),
            prelude_len: 0,
        }
    }

    /// Parse a comma-separated command list.
    ///
    /// Empty entries between commands are skipped. Empty entries at the end
    /// each become a bare newline, so `"show ver,,"` sends the command and
    /// then two newlines.
    pub fn parse_list(list: &str) -> Self {
        let parts: Vec<&str> = list.split(',').collect();
        let mut commands = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let part = part.trim();
            if !part.is_empty() {
                commands.push(Command::parse(part));
                continue;
            }
            if parts[i..].iter().all(|p| p.trim().is_empty()) {
                // Only trailing entries remain.
                if list.trim().is_empty() {
                    break;
                }
                commands.extend(std::iter::repeat_n(Command::Newline, parts.len() - i));
                break;
            }
        }

        Self {
            commands,
            prelude_len: 0,
        }
    }

    /// Parse a command file: one command per line, blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse_file(contents: &str) -> Self {
        Self::from_commands(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Append every command of `other`.
    pub fn extend(&mut self, other: CommandBatch) {
        self.commands.extend(other.commands);
    }

    /// Put disable-paging commands in front of the batch.
    ///
    /// Each entry may hold several lines (`config system console\nend`);
    /// every non-empty line becomes its own command.
    pub fn with_paging_prelude<I, S>(mut self, prelude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<Command> = prelude
            .into_iter()
            .flat_map(|entry| {
                entry
                    .as_ref()
                    .split('\n')
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| Command::Line(line.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        self.prelude_len += lines.len();
        self.commands.splice(0..0, lines);
        self
    }

    /// The commands, prelude first.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of entries, prelude included.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch has no entries.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of prelude entries at the front.
    pub fn prelude_len(&self) -> usize {
        self.prelude_len
    }

    /// Prompts the device prints for this batch: one per entry.
    pub fn expected_prompts(&self) -> usize {
        self.commands.len()
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl<'a> IntoIterator for &'a CommandBatch {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

impl From<&str> for CommandBatch {
    fn from(command: &str) -> Self {
        Self::from_commands([command])
    }
}

impl From<Vec<String>> for CommandBatch {
    fn from(commands: Vec<String>) -> Self {
        Self::from_commands(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Command {
        Command::Line(text.to_string())
    }

    #[test]
    fn test_parse_list_trailing_newlines() {
        let batch = CommandBatch::parse_list("show version,show clock,,");
        assert_eq!(
            batch.commands(),
            &[line("show version"), line("show clock"), Command::Newline, Command::Newline]
        );
        assert_eq!(batch.expected_prompts(), 4);
    }

    #[test]
    fn test_parse_list_skips_middle_empties() {
        let batch = CommandBatch::parse_list("a,, ,b");
        assert_eq!(batch.commands(), &[line("a"), line("b")]);
    }

    #[test]
    fn test_parse_list_marker_and_empty() {
        let batch = CommandBatch::parse_list(r"show run,\n");
        assert_eq!(batch.commands(), &[line("show run"), Command::Newline]);
        assert!(CommandBatch::parse_list("").is_empty());
        assert!(CommandBatch::parse_list("  ").is_empty());
    }

    #[test]
    fn test_parse_file_skips_comments_and_blanks() {
        let batch = CommandBatch::parse_file("# inventory\nshow inventory\n\n  # note\nshow ip int brief\n");
        assert_eq!(batch.commands(), &[line("show inventory"), line("show ip int brief")]);
    }

    #[test]
    fn test_paging_prelude_goes_first_and_counts() {
        let batch = CommandBatch::parse_list("show ver")
            .with_paging_prelude(["config system console\nset output standard\nend"]);
        assert_eq!(batch.prelude_len(), 3);
        assert_eq!(batch.expected_prompts(), 4);
        assert_eq!(batch.commands()[0], line("config system console"));
        assert_eq!(batch.commands()[3], line("show ver"));
    }

    #[test]
    fn test_empty_prelude_is_noop() {
        let batch = CommandBatch::from("show ver").with_paging_prelude([""]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.prelude_len(), 0);
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(Command::parse("show ver").wire(), "show ver\n");
        assert_eq!(Command::parse("").wire(), "\n");
        assert_eq!(Command::parse("\\n").wire(), "\n");
        assert_eq!(Command::parse("\n").wire(), "\n");
    }
}
