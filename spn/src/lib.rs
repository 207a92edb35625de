//! # spn
//!
//! Prompt-counting SSH command engine for network device fleets.
//!
//! spn logs into switches, routers and firewalls, sends a whole batch of CLI
//! commands down one interactive shell, and decides the batch is done when
//! the device prompt has come back once per command. It needs no per-vendor
//! parser: the only vendor knowledge is the prompt (detected or given) and an
//! optional paging prelude.
//!
//! ## Features
//!
//! - Async SSH via russh, with legacy KEX/cipher/host-key algorithms for old gear
//! - Direct, proxied (jump host) or denied connections from routing rules
//! - Prompt auto-detection that copes with banners and repeated prompts
//! - ANSI/VT100 stripping that works across chunk boundaries
//! - Transcript files with normalised line endings
//! - Vendor fingerprinting and a bounded worker pool for many devices
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spn::{CommandBatch, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), spn::Error> {
//!     let mut session = SessionBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .password("secret")
//!         .invoke_shell(true)
//!         .build()?;
//!
//!     session.connect().await?;
//!     let prompt = session.find_prompt().await?;
//!     println!("prompt: {}", prompt);
//!
//!     let batch = CommandBatch::parse_list("terminal length 0,show version");
//!     let transcript = session.execute(&batch).await?;
//!     println!("{} ({})", transcript.output, transcript.completion);
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod channel;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod output;
pub mod platform;
pub mod routing;
pub mod transport;

pub use batch::{BatchRunner, BatchSummary, DeviceJob, JobOutcome, JobReport, JobSpec};
pub use driver::{
    Command, CommandBatch, Completion, DetectedPrompt, PromptOrigin, Session, SessionBuilder,
    SessionState, Transcript,
};
pub use error::{Error, Result};
pub use fingerprint::{DeviceDescriptor, Fingerprinter, ProbeFingerprinter};
pub use output::OutputSink;
pub use platform::{VendorProfile, VendorRegistry};
pub use routing::{Route, RoutingResolver, RoutingRule};
pub use transport::{AuthMethod, HostKeyVerification, ProxyConfig, SessionConfig};
