use thiserror::Error;

/// Error kinds surfaced by the synchronization core.
///
/// The variant determines how the control loop reacts: `ConfigurationInvalid`
/// is always fatal at startup, everything else demotes to a skipped iteration.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("transient sample failure: {0}")]
    SampleTransient(String),

    #[error("management round timed out")]
    MgmtTimeout,

    #[error("malformed management response: {0}")]
    MgmtProtocol(String),

    #[error("sample discarded: ambiguous UTC second at {ts_ns}ns")]
    LeapAmbiguous { ts_ns: i64 },

    #[error("clock adjustment rejected: {0}")]
    AdjustmentFailed(String),
}

impl SessionError {
    /// `true` for kinds that should abort the process rather than skip an iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::ConfigurationInvalid(_))
    }
}
