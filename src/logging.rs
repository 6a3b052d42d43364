use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TrainError;

/// Environment variable holding a `Targets` filter, e.g. `plantraj=debug`.
pub const LOG_ENV: &str = "PLANTRAJ_LOG";

fn targets() -> Result<Targets, TrainError> {
    match std::env::var(LOG_ENV) {
        Ok(spec) => Targets::from_str(&spec)
            .map_err(|err| TrainError::InvalidConfig(format!("{LOG_ENV}: {err}"))),
        Err(_) => Ok(Targets::new().with_default(Level::INFO)),
    }
}

/// Logs to the console and, without colors, to `log_file`.
pub fn init<P: AsRef<Path>>(log_file: P) -> Result<(), TrainError> {
    let file = File::create(log_file)?;

    tracing_subscriber::registry()
        .with(targets()?)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|err| TrainError::InvalidConfig(format!("logging already set up: {err}")))
}
