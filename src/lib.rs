//! # cf-ddns
//!
//! Keeps Cloudflare `A` and `AAAA` records pointed at the host's current
//! public addresses.
//!
//! ## Features
//!
//! - IPv4 and IPv6 detection through Cloudflare's trace endpoints
//! - Any number of zones and subdomains, including the bare domain
//! - Duplicate record cleanup, preferring a record that is already correct
//! - Removal of `A`/`AAAA` records when that family disappears
//! - Single-shot or repeating mode with graceful shutdown
//!
//! ## Usage
//!
//! ```bash
//! # Update once and exit
//! cf-ddns --config-path config.json
//!
//! # Keep records in sync, checking every minute
//! cf-ddns --repeat
//! ```

pub mod cleaner;
pub mod config;
pub mod detector;
pub mod error;
pub mod providers;
pub mod reconciler;
pub mod scheduler;
pub mod shutdown;

pub use config::Config;
pub use detector::IpDetector;
pub use error::{DdnsError, Result};
pub use scheduler::Scheduler;
