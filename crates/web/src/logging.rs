use crate::config::{Config, LogOutput};
use tracing::debug;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Installs the global fmt subscriber described by `config`, unless one is already set.
pub(crate) fn init(config: &Config) {
    let writer = match config.log_output {
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
    };

    if tracing_subscriber::fmt().with_max_level(config.log_level).with_writer(writer).try_init().is_err() {
        debug!("global subscriber already installed, keeping it");
    }
}
