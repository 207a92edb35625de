//! Session layer.
//!
//! [`Session`] owns one device connection and runs command batches over it.
//! It is built with [`SessionBuilder`], connected with
//! [`Session::connect`], and then driven through
//! [`create_shell`](Session::create_shell),
//! [`find_prompt`](Session::find_prompt) and
//! [`execute`](Session::execute).

mod builder;
mod command;
mod detect;
mod executor;
pub(crate) mod response;
mod session;

pub use builder::SessionBuilder;
pub use command::{Command, CommandBatch, NEWLINE_MARKER};
pub use detect::{DetectedPrompt, PromptOrigin};
pub use response::{Completion, Transcript};
pub use session::{Session, SessionState};
