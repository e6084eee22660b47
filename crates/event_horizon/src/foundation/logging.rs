//! Logging utilities
//!
//! The crate logs through the `log` facade with bracketed subsystem tags
//! (`[SHADER]`, `[PIPELINE]`, ...). These helpers install `env_logger` as the
//! backend. Initialisation happens at most once per process.

use std::sync::Once;

use crate::core::config::LoggingSettings;

pub use log::{debug, error, info, trace, warn};

static INIT: Once = Once::new();

/// Initialize logging from `RUST_LOG`, defaulting to `info`
pub fn init() {
    init_with(&LoggingSettings::default());
}

/// Initialize logging from engine settings
///
/// Later calls are ignored, so tests and applications can both call this.
pub fn init_with(settings: &LoggingSettings) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = &settings.filter {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        builder.write_style(settings.write_style.into());

        // A logger installed by the host application wins.
        if builder.try_init().is_err() {
            log::debug!("Logger already installed, keeping existing backend");
            return;
        }

        log::debug!("Logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init();
        init_with(&LoggingSettings {
            filter: Some("trace".to_string()),
            ..LoggingSettings::default()
        });
        info!("logging still works after repeated init");
    }
}
