//! Vendor profiles.
//!
//! A profile names a device family, the commands that turn off its pager,
//! and the `show version` markers that identify it. The engine only consumes
//! the paging prelude; markers are used by
//! [`ProbeFingerprinter`](crate::fingerprint::ProbeFingerprinter).

mod profile;
mod registry;

pub use profile::VendorProfile;
pub use registry::{GENERIC, VendorRegistry};
