mod app;
pub mod askpass;
pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
mod input;
pub mod launcher;
pub mod manage;
mod picker;
pub mod plan;
pub mod prompt;
pub mod resolver;
pub mod secret;
mod sshconfig;
pub mod store;
mod terminal;
pub mod vault;

pub use app::App;
pub use config::Config;
pub use entry::ServerEntry;
pub use error::{Error, Result};
pub use store::EntryStore;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "SSHHOP_LOG";

/// Log to stderr, filtered by `SSHHOP_LOG` (defaults to `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .with(filter)
        .init();
}
