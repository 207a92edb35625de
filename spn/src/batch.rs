//! Multi-device batch runs.
//!
//! A [`BatchRunner`] drives many [`DeviceJob`]s through a fixed number of
//! workers. Every job owns its session from connect to disconnect; a job that
//! exceeds its timeout is abandoned and its connection dropped. One failing
//! device never stops its siblings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::time::Instant;

use crate::driver::{CommandBatch, Session, SessionBuilder, Transcript};
use crate::error::{ConfigError, Error, Result};
use crate::fingerprint::{Fingerprinter, ProbeFingerprinter};
use crate::output::OutputSink;
use crate::platform::VendorRegistry;
use crate::transport::{Connector, SessionConfig, SshConnector};

/// Workers used when none are configured.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Per-job time limit used when none is configured.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// One device and what to run on it.
#[derive(Debug)]
pub struct DeviceJob {
    /// Label used in logs and reports.
    pub name: String,

    /// Validated session settings.
    pub config: SessionConfig,

    /// Commands to run, paging prelude included.
    pub commands: CommandBatch,

    /// Where shell output goes.
    pub output: OutputSink,

    /// Probe the device first and prepend its paging prelude.
    pub fingerprint: bool,

    /// Count the prompt seen while probing instead of detecting it again.
    pub use_fingerprint_prompt: bool,
}

impl DeviceJob {
    /// A job with no output sink and no fingerprinting.
    pub fn new(name: impl Into<String>, config: SessionConfig, commands: CommandBatch) -> Self {
        Self {
            name: name.into(),
            config,
            commands,
            output: OutputSink::none(),
            fingerprint: false,
            use_fingerprint_prompt: false,
        }
    }

    /// Send shell output to `output`.
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// Fingerprint the device before running the batch.
    pub fn with_fingerprint(mut self, use_prompt: bool) -> Self {
        self.fingerprint = true;
        self.use_fingerprint_prompt = use_prompt;
        self
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The batch ran; the transcript may still be partial.
    Completed(Transcript),

    /// The job failed before or during execution.
    Failed(Error),

    /// The job exceeded its time limit and was abandoned.
    TimedOut(Duration),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed(transcript) => write!(f, "{}", transcript.completion),
            JobOutcome::Failed(e) => write!(f, "failed: {}", e),
            JobOutcome::TimedOut(limit) => write!(f, "abandoned after {:?}", limit),
        }
    }
}

/// Result of one job.
#[derive(Debug)]
pub struct JobReport {
    /// Job label.
    pub name: String,

    /// Target host.
    pub host: String,

    /// What happened.
    pub outcome: JobOutcome,

    /// Wall time spent on the job.
    pub elapsed: Duration,
}

impl JobReport {
    /// Whether the batch ran to the end of its protocol.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed(_))
    }

    /// The transcript, if the batch ran.
    pub fn transcript(&self) -> Option<&Transcript> {
        match &self.outcome {
            JobOutcome::Completed(transcript) => Some(transcript),
            _ => None,
        }
    }
}

/// Reports of a whole batch run, in job order.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// One report per job.
    pub reports: Vec<JobReport>,

    /// Wall time of the run.
    pub elapsed: Duration,
}

impl BatchSummary {
    /// Number of jobs that completed.
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Number of jobs that failed or timed out.
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    /// Whether every job completed.
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Runs device jobs through a fixed-size worker pool.
#[derive(Debug, Clone)]
pub struct BatchRunner<C: Connector + Clone = SshConnector> {
    connector: C,
    max_workers: usize,
    job_timeout: Duration,
}

impl BatchRunner<SshConnector> {
    /// Runner that connects over SSH.
    pub fn new() -> Self {
        Self::with_connector(SshConnector)
    }
}

impl Default for BatchRunner<SshConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector + Clone> BatchRunner<C> {
    /// Runner that connects through `connector`.
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            max_workers: DEFAULT_MAX_WORKERS,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Set the number of jobs in flight at once (at least one).
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Set the time limit of a single job.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Run every job and report on each, in the order given.
    pub async fn run(&self, jobs: Vec<DeviceJob>) -> BatchSummary {
        let start = Instant::now();
        let total = jobs.len();
        info!(
            "Running {} job(s) with {} worker(s)",
            total, self.max_workers
        );

        let mut reports: Vec<(usize, JobReport)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| async move { (index, self.run_job(job).await) })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);

        let summary = BatchSummary {
            reports: reports.into_iter().map(|(_, report)| report).collect(),
            elapsed: start.elapsed(),
        };
        info!(
            "Batch finished in {:?}: {} succeeded, {} failed",
            summary.elapsed,
            summary.succeeded(),
            summary.failed()
        );
        summary
    }

    /// Run a single job under the per-job time limit.
    pub async fn run_job(&self, job: DeviceJob) -> JobReport {
        let start = Instant::now();
        let name = job.name.clone();
        let host = job.config.host.clone();
        debug!("Starting job {} ({})", name, host);

        let outcome = match tokio::time::timeout(
            self.job_timeout,
            run_device(self.connector.clone(), job),
        )
        .await
        {
            Ok(Ok(transcript)) => JobOutcome::Completed(transcript),
            Ok(Err(e)) => {
                error!("Job {} ({}) failed: {}", name, host, e);
                JobOutcome::Failed(e)
            }
            Err(_) => {
                warn!(
                    "Job {} ({}) exceeded {:?}, abandoning it",
                    name, host, self.job_timeout
                );
                JobOutcome::TimedOut(self.job_timeout)
            }
        };

        JobReport {
            name,
            host,
            outcome,
            elapsed: start.elapsed(),
        }
    }
}

/// Run one job end to end: optional fingerprint, connect, prompt detection,
/// execution and disconnect.
///
/// A failed fingerprint only costs the paging prelude. The session is always
/// disconnected, whatever the outcome.
pub async fn run_device<C: Connector + Clone>(connector: C, job: DeviceJob) -> Result<Transcript> {
    let DeviceJob {
        name,
        mut config,
        mut commands,
        output,
        fingerprint,
        use_fingerprint_prompt,
    } = job;

    if fingerprint && config.invoke_shell {
        match ProbeFingerprinter::with_connector(connector.clone())
            .fingerprint(&config)
            .await
        {
            Ok(descriptor) => {
                info!("{}: vendor {}", name, descriptor.vendor);
                commands = descriptor.apply(&mut config, commands, use_fingerprint_prompt);
                VendorRegistry::builtin()
                    .resolve(&descriptor.vendor)
                    .apply_timeout(&mut config);
            }
            Err(e) => warn!("{}: fingerprinting failed, continuing without it: {}", name, e),
        }
    }

    let mut session = Session::with_connector(config, connector)?;
    session.set_output(output);
    let result = drive(&mut session, &commands).await;
    session.disconnect().await;
    result
}

async fn drive<C: Connector>(session: &mut Session<C>, commands: &CommandBatch) -> Result<Transcript> {
    session.connect().await?;

    if session.config().invoke_shell {
        session.create_shell().await?;
        if session.expect_prompt().is_none() {
            match session.find_prompt().await {
                Ok(detected) if !detected.is_confident() => {
                    warn!("Counting on uncertain prompt {:?}", detected.prompt)
                }
                Ok(_) => {}
                Err(e) => warn!("Prompt detection failed, falling back to fixed delay: {}", e),
            }
        }
    }

    session.execute(commands).await
}

/// One entry of a JSON job file.
///
/// Everything but `host` and `commands` falls back to the base builder the
/// file is loaded with.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    /// Label; defaults to the host.
    #[serde(default)]
    pub name: Option<String>,

    /// Target host, optionally `host:port`.
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Comma-separated command list.
    pub commands: String,

    /// Vendor profile supplying the paging prelude.
    #[serde(default)]
    pub vendor: Option<String>,

    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub prompt_count: Option<usize>,

    #[serde(default)]
    pub invoke_shell: Option<bool>,

    #[serde(default)]
    pub legacy_mode: Option<bool>,

    /// Transcript file for this device.
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    #[serde(default)]
    pub append: bool,

    #[serde(default)]
    pub fingerprint: bool,
}

impl JobSpec {
    /// Parse a JSON array of job entries.
    pub fn parse_list(json: &str) -> Result<Vec<JobSpec>> {
        serde_json::from_str(json).map_err(|e| {
            ConfigError::Invalid {
                field: "job file",
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Read and parse a job file.
    pub fn load(path: &Path) -> Result<Vec<JobSpec>> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            field: "job file",
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::parse_list(&json)
    }

    /// Turn the entry into a job, starting from `base`.
    pub fn into_job(self, base: &SessionBuilder) -> Result<DeviceJob> {
        let (host, embedded_port) = split_host_port(&self.host);
        let mut builder = base.clone().host(host);
        if let Some(port) = self.port.or(embedded_port) {
            builder = builder.port(port);
        }
        if let Some(username) = self.username {
            builder = builder.username(username);
        }
        if let Some(password) = self.password {
            builder = builder.password(password);
        }
        if let Some(prompt) = self.prompt {
            builder = builder.expect_prompt(prompt);
        }
        if let Some(count) = self.prompt_count {
            builder = builder.prompt_count(count);
        }
        if let Some(invoke_shell) = self.invoke_shell {
            builder = builder.invoke_shell(invoke_shell);
        }
        if let Some(legacy) = self.legacy_mode {
            builder = builder.legacy_mode(legacy);
        }
        let mut config = builder.build_config()?;

        let mut commands = CommandBatch::parse_list(&self.commands);
        if let Some(vendor) = &self.vendor {
            let profile = VendorRegistry::builtin().resolve(vendor);
            commands = profile.prelude(commands);
            profile.apply_timeout(&mut config);
        }

        let name = self.name.unwrap_or_else(|| config.host.clone());
        let output = match &self.output_file {
            Some(path) => OutputSink::none()
                .with_file(path, self.append)
                .unwrap_or_else(|e| {
                    warn!("{}: cannot open {}: {}", name, path.display(), e);
                    OutputSink::none()
                }),
            None => OutputSink::none(),
        };

        let mut job = DeviceJob::new(name, config, commands).with_output(output);
        if self.fingerprint && self.vendor.is_none() {
            job = job.with_fingerprint(false);
        }
        Ok(job)
    }
}

/// Split `host:port`. Bare IPv6 addresses are left alone.
pub fn split_host_port(target: &str) -> (&str, Option<u16>) {
    if let Some(inner) = target.strip_prefix('[') {
        if let Some((host, rest)) = inner.split_once(']') {
            let port = rest.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (target, None),
        },
        _ => (target, None),
    }
}
