//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use log::{LevelFilter, warn};

use spn::batch::split_host_port;
use spn::error::{ConfigError, Result};
use spn::{CommandBatch, OutputSink, RoutingResolver, SessionBuilder};

/// Run CLI commands on network devices over SSH, counting prompts to know
/// when the output is complete.
#[derive(Debug, Parser)]
#[command(name = "spn", version, about)]
pub struct Cli {
    /// Target host, optionally host:port
    #[arg(long, env = "SSH_HOST")]
    pub host: Option<String>,

    /// Login user name
    #[arg(long, env = "SSH_USER")]
    pub user: Option<String>,

    /// Login password
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// SSH port, unless given in --host
    #[arg(long, env = "SSH_PORT", default_value_t = 22)]
    pub port: u16,

    /// Commands separated by commas; trailing empty entries send bare newlines
    #[arg(short = 'c', long, default_value = "")]
    pub cmds: String,

    /// File with one command per line (# starts a comment)
    #[arg(long, value_name = "FILE")]
    pub cmd_file: Option<PathBuf>,

    /// Run commands in an interactive shell (recommended for network devices)
    #[arg(long)]
    pub invoke_shell: bool,

    /// Prompt to count (detected when empty)
    #[arg(long, default_value = "")]
    pub prompt: String,

    /// Prompts to wait for (default: one per command)
    #[arg(long)]
    pub prompt_count: Option<usize>,

    /// Connection timeout in seconds
    #[arg(short = 't', long, default_value_t = 360)]
    pub timeout: u64,

    /// Fixed wait in seconds when no prompt is known
    #[arg(long, default_value_t = 5)]
    pub shell_timeout: u64,

    /// Time allowed for all prompts to appear, in milliseconds
    #[arg(long, default_value_t = 30000)]
    pub expect_prompt_timeout: u64,

    /// Pause between two commands, in seconds
    #[arg(short = 'i', long = "inter-command-time", default_value_t = 1.0)]
    pub inter_command_time: f64,

    /// Do not echo device output to the terminal
    #[arg(long)]
    pub no_screen: bool,

    /// Save a transcript to this file
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Append to the transcript file instead of overwriting it
    #[arg(long)]
    pub append: bool,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Fingerprint the device before running commands
    #[arg(short = 'f', long)]
    pub fingerprint: bool,

    /// Save the fingerprint as JSON
    #[arg(long, value_name = "FILE")]
    pub fingerprint_output: Option<PathBuf>,

    /// Count the prompt seen while fingerprinting
    #[arg(long)]
    pub use_fingerprint_prompt: bool,

    /// Vendor profile for the paging prelude (cisco, arista, paloalto, ...)
    #[arg(long)]
    pub vendor: Option<String>,

    /// Prefer old key exchange and ciphers, retry logins, slow down timing
    #[arg(long)]
    pub legacy_mode: bool,

    /// Comma-separated paging-disable commands sent before the batch
    #[arg(long, default_value = "")]
    pub disable_paging_commands: String,

    /// Run the jobs in this JSON file instead of a single host
    #[arg(long, value_name = "FILE")]
    pub batch: Option<PathBuf>,

    /// Devices handled at once in batch mode
    #[arg(long, default_value_t = spn::batch::DEFAULT_MAX_WORKERS)]
    pub workers: usize,

    /// Seconds before a batch job is abandoned
    #[arg(long, default_value_t = 600)]
    pub job_timeout: u64,

    /// Apply routing rules
    #[arg(long, env = "SSH_USE_ROUTING", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub use_routing: bool,

    /// Routing rules as JSON: [{"match": ..., "action": ..., "port": ...}]
    #[arg(long, env = "SSH_ROUTING_RULES", value_name = "JSON")]
    pub routing_rules: Option<String>,

    /// Jump host for proxied routes
    #[arg(long, env = "SSH_PROXY_HOST")]
    pub proxy_host: Option<String>,

    #[arg(long, env = "SSH_PROXY_PORT", default_value_t = 22)]
    pub proxy_port: u16,

    /// Jump host user (default: --user)
    #[arg(long, env = "SSH_PROXY_USER")]
    pub proxy_user: Option<String>,

    /// Jump host password (default: --password)
    #[arg(long, env = "SSH_PROXY_PASS", hide_env_values = true)]
    pub proxy_pass: Option<String>,

    /// Private key for the jump host, used instead of a password
    #[arg(long, env = "SSH_PROXY_KEY", value_name = "FILE")]
    pub proxy_key: Option<PathBuf>,
}

impl Cli {
    /// Log level chosen by `-v`.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Target host and port, with a port in `--host` taking precedence.
    pub fn target(&self) -> (String, u16) {
        let host = self.host.as_deref().unwrap_or_default().trim();
        let (host, port) = split_host_port(host);
        (host.to_string(), port.unwrap_or(self.port))
    }

    /// Builder carrying every option that is not host-specific.
    pub fn base_builder(&self) -> Result<SessionBuilder> {
        let (host, port) = self.target();
        let mut builder = SessionBuilder::new(host)
            .port(port)
            .invoke_shell(self.invoke_shell)
            .expect_prompt(self.prompt.trim())
            .timeout(Duration::from_secs(self.timeout))
            .shell_timeout(Duration::from_secs(self.shell_timeout))
            .inter_command_delay(self.inter_command_delay()?)
            .expect_prompt_timeout(Duration::from_millis(self.expect_prompt_timeout))
            .legacy_mode(self.legacy_mode);

        if let Some(user) = &self.user {
            builder = builder.username(user);
        }
        if let Some(password) = &self.password {
            builder = builder.password(password);
        }
        if let Some(count) = self.prompt_count {
            builder = builder.prompt_count(count);
        }

        if self.use_routing {
            match self.routing_rules.as_deref().map(str::trim) {
                Some(json) if !json.is_empty() => {
                    builder = builder.routing(RoutingResolver::from_json(json)?);
                }
                _ => warn!("Routing enabled but SSH_ROUTING_RULES is empty"),
            }
        }

        if let Some(proxy_host) = self.proxy_host.as_deref().filter(|h| !h.trim().is_empty()) {
            let user = self
                .proxy_user
                .clone()
                .or_else(|| self.user.clone())
                .unwrap_or_default();
            builder = match (&self.proxy_key, &self.proxy_pass) {
                (Some(key), _) => builder.proxy_key(proxy_host, self.proxy_port, user, key),
                (None, pass) => {
                    let pass = pass.clone().or_else(|| self.password.clone()).unwrap_or_default();
                    builder.proxy_password(proxy_host, self.proxy_port, user, pass)
                }
            };
        }

        Ok(builder)
    }

    /// The command batch: file contents first, then `--cmds`.
    pub fn commands(&self) -> Result<CommandBatch> {
        let mut batch = CommandBatch::new();
        if let Some(path) = &self.cmd_file {
            let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
                field: "command file",
                message: format!("{}: {}", path.display(), e),
            })?;
            batch.extend(CommandBatch::parse_file(&contents));
        }
        batch.extend(CommandBatch::parse_list(&self.cmds));
        Ok(batch)
    }

    /// Custom paging commands from `--disable-paging-commands`.
    pub fn custom_paging(&self) -> Vec<String> {
        self.disable_paging_commands
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }

    /// Output sink for a single-host run.
    ///
    /// A transcript file that cannot be opened is reported and skipped.
    pub fn output_sink(&self) -> OutputSink {
        let mut sink = OutputSink::none();
        if let Some(path) = &self.output_file {
            sink = OutputSink::none()
                .with_file(path, self.append)
                .unwrap_or_else(|e| {
                    warn!("Cannot open {}: {}", path.display(), e);
                    OutputSink::none()
                });
        }
        if !self.no_screen {
            sink = sink.with_interactive(Box::new(std::io::stdout()));
        }
        sink
    }

    fn inter_command_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.inter_command_time).map_err(|_| {
            ConfigError::Invalid {
                field: "inter-command time",
                message: format!("{} is not a valid number of seconds", self.inter_command_time),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["spn"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_port_in_host_wins() {
        let cli = parse(&["--host", "10.1.1.1:2222", "--port", "22"]);
        assert_eq!(cli.target(), ("10.1.1.1".to_string(), 2222));

        let cli = parse(&["--host", "core1", "--port", "8022"]);
        assert_eq!(cli.target(), ("core1".to_string(), 8022));
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(parse(&[]).log_level(), LevelFilter::Info);
        assert_eq!(parse(&["-v"]).log_level(), LevelFilter::Debug);
        assert_eq!(parse(&["-vv"]).log_level(), LevelFilter::Trace);
    }

    #[test]
    fn test_base_builder_timing() {
        let cli = parse(&[
            "--host", "r1", "--user", "admin", "--password", "pw", "-i", "0.5",
            "--expect-prompt-timeout", "1500", "--prompt-count", "3",
        ]);
        let config = cli.base_builder().unwrap().build_config().unwrap();
        assert_eq!(config.inter_command_delay, Duration::from_millis(500));
        assert_eq!(config.expect_prompt_timeout, Duration::from_millis(1500));
        assert_eq!(config.prompt_count, Some(3));
        assert_eq!(config.expect_prompt, None);
    }

    #[test]
    fn test_negative_inter_command_time_rejected() {
        let cli = parse(&["--host", "r1", "-i=-1"]);
        assert!(cli.base_builder().is_err());
    }

    #[test]
    fn test_commands_keep_trailing_newlines() {
        let cli = parse(&["-c", "show ver,show int,,"]);
        let batch = cli.commands().unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.commands()[3].is_newline());
    }

    #[test]
    fn test_custom_paging_split() {
        let cli = parse(&["--disable-paging-commands", "terminal length 0, terminal width 511,"]);
        assert_eq!(cli.custom_paging(), ["terminal length 0", "terminal width 511"]);
    }

    #[test]
    fn test_proxy_defaults_to_login_credentials() {
        let cli = parse(&[
            "--host", "r1", "--user", "admin", "--password", "pw", "--proxy-host", "jump1",
        ]);
        let config = cli.base_builder().unwrap().build_config().unwrap();
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.host, "jump1");
        assert_eq!(proxy.port, 22);
        assert_eq!(proxy.username, "admin");
    }

    #[test]
    fn test_bad_routing_rules_rejected() {
        let cli = parse(&["--host", "r1", "--use-routing", "--routing-rules", "{not json"]);
        assert!(cli.base_builder().is_err());
    }
}
