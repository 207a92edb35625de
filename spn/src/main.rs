//! `spn` command-line entry point.
//!
//! # Usage
//!
//! ```bash
//! spn --host 10.0.0.1 --user admin --password secret --invoke-shell \
//!     -c "show version,show ip interface brief" -o captures/r1.txt
//!
//! SSH_USER=admin SSH_PASSWORD=secret spn --batch jobs.json --workers 10
//! ```

mod cli;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use spn::batch::{BatchSummary, JobOutcome, run_device};
use spn::error::{ConfigError, Result};
use spn::transport::SshConnector;
use spn::{
    BatchRunner, DeviceDescriptor, DeviceJob, Fingerprinter, JobSpec, ProbeFingerprinter,
    VendorRegistry,
};

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level().as_str()),
    )
    .init();

    let result = match &cli.batch {
        Some(_) => run_batch(&cli).await,
        None => run_single(&cli).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_single(cli: &Cli) -> Result<bool> {
    let mut config = cli.base_builder()?.build_config()?;
    let mut commands = cli.commands()?;
    if commands.is_empty() && !cli.fingerprint {
        return Err(ConfigError::Missing {
            field: "commands (--cmds or --cmd-file)",
        }
        .into());
    }

    info!(
        "Connecting to {}:{} as {}",
        config.host, config.port, config.username
    );

    let descriptor = if cli.fingerprint {
        fingerprint(cli, &config).await
    } else {
        None
    };

    if commands.is_empty() {
        return Ok(descriptor.is_some());
    }

    let registry = VendorRegistry::builtin();
    let before = commands.prelude_len();
    if let Some(found) = &descriptor {
        commands = found.apply(&mut config, commands, cli.use_fingerprint_prompt);
        registry.resolve(&found.vendor).apply_timeout(&mut config);
    }
    if commands.prelude_len() == before {
        if let Some(vendor) = cli.vendor.as_deref() {
            let profile = registry.resolve(vendor);
            info!("Using {} paging prelude", profile.name);
            commands = profile.prelude(commands);
            profile.apply_timeout(&mut config);
        } else {
            let custom = cli.custom_paging();
            if !custom.is_empty() {
                info!("Using custom paging commands {:?}", custom);
                commands = commands.with_paging_prelude(custom);
            }
        }
    }

    let host = config.host.clone();
    let job = DeviceJob::new(host.clone(), config, commands).with_output(cli.output_sink());
    let transcript = run_device(SshConnector, job).await?;

    if transcript.is_complete() {
        info!("{}: {} in {:?}", host, transcript.completion, transcript.elapsed);
    } else {
        warn!(
            "{}: {} in {:?}, output may be incomplete",
            host, transcript.completion, transcript.elapsed
        );
    }
    Ok(true)
}

async fn fingerprint(cli: &Cli, config: &spn::SessionConfig) -> Option<DeviceDescriptor> {
    match ProbeFingerprinter::new().fingerprint(config).await {
        Ok(descriptor) => {
            match serde_json::to_string_pretty(&descriptor) {
                Ok(json) => {
                    println!("{}", json);
                    if let Some(path) = &cli.fingerprint_output {
                        match std::fs::write(path, &json) {
                            Ok(()) => info!("Fingerprint saved to {}", path.display()),
                            Err(e) => warn!("Cannot save fingerprint to {}: {}", path.display(), e),
                        }
                    }
                }
                Err(e) => warn!("Cannot encode fingerprint: {}", e),
            }
            Some(descriptor)
        }
        Err(e) => {
            warn!("Fingerprinting failed, continuing with defaults: {}", e);
            None
        }
    }
}

async fn run_batch(cli: &Cli) -> Result<bool> {
    let Some(path) = &cli.batch else {
        return Ok(false);
    };
    let specs = JobSpec::load(path)?;
    let base = cli.base_builder()?;

    let mut jobs = Vec::with_capacity(specs.len());
    let mut rejected = 0;
    for spec in specs {
        let label = spec.name.clone().unwrap_or_else(|| spec.host.clone());
        match spec.into_job(&base) {
            Ok(job) if cli.fingerprint => jobs.push(job.with_fingerprint(cli.use_fingerprint_prompt)),
            Ok(job) => jobs.push(job),
            Err(e) => {
                error!("Skipping job {}: {}", label, e);
                rejected += 1;
            }
        }
    }

    let summary = BatchRunner::new()
        .max_workers(cli.workers)
        .job_timeout(Duration::from_secs(cli.job_timeout))
        .run(jobs)
        .await;
    print_summary(&summary);

    Ok(rejected == 0 && summary.all_succeeded())
}

fn print_summary(summary: &BatchSummary) {
    println!("{:<24} {:<24} {:>10}  RESULT", "JOB", "HOST", "ELAPSED");
    for report in &summary.reports {
        let marker = match report.outcome {
            JobOutcome::Completed(_) => "ok",
            JobOutcome::Failed(_) | JobOutcome::TimedOut(_) => "FAIL",
        };
        println!(
            "{:<24} {:<24} {:>9.1}s  {} {}",
            report.name,
            report.host,
            report.elapsed.as_secs_f64(),
            marker,
            report.outcome
        );
    }
    println!(
        "{} job(s): {} succeeded, {} failed in {:.1}s",
        summary.reports.len(),
        summary.succeeded(),
        summary.failed(),
        summary.elapsed.as_secs_f64()
    );
}
