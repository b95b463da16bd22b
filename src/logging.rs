//! Logging initialization
//!
//! One entry point installs the `tracing` subscriber for the process.
//! `RUST_LOG` always wins over the profile's default filter.

use std::sync::Once;

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Logging profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output at debug level
    Development,
    /// JSON lines at info level
    Production,
    /// Warnings only, written through the test harness
    Test,
}

impl Profile {
    fn default_filter(self) -> &'static str {
        match self {
            Profile::Development => "arbor_store=debug,arbor=debug",
            Profile::Production => "arbor_store=info,arbor=info",
            Profile::Test => "arbor_store=warn",
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Installs the subscriber for `profile`. Later calls are no-ops.
pub fn init(profile: Profile) {
    init_with_filter(profile, None);
}

/// Like [`init`], with a filter directive replacing the profile default
pub fn init_with_filter(profile: Profile, filter: Option<&str>) {
    INIT_ONCE.call_once(|| {
        let directive = filter.unwrap_or(profile.default_filter());
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

        // Another subscriber may already be installed by the host application
        let _ = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .finish()
                .try_init(),
            Profile::Test => tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .finish()
                .try_init(),
        };
    });
}
