use std::io;

/// Config-load failures are the crate's only fatal error path; everything
/// past startup is handled inline (logged, socket closed, reconnect
/// scheduled) rather than propagated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to open config file '{path}': {source}")]
    Open { path: String, source: io::Error },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}
