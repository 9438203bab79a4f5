use thiserror::Error;

/// Failure value delivered on the pool's error stream.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {name} failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {name} panicked: {message}")]
    Panic { name: String, message: String },

    /// The execution unit was dropped before it could report, e.g. the
    /// runtime shut down underneath it.
    #[error("job {name} was lost before reporting an outcome")]
    Lost { name: String },
}

impl JobError {
    pub fn name(&self) -> &str {
        match self {
            JobError::Failed { name, .. }
            | JobError::Panic { name, .. }
            | JobError::Lost { name } => name,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum SpawnError {
    /// Submitting after `stop()` is a usage error.
    #[error("pool is stopped")]
    Stopped,
}

#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("pool needs at least one worker")]
    ZeroWorkers,
}
