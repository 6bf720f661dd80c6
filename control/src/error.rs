use thiserror::Error;

/// Rejection of a declarative resource by the model translator
///
/// Never retried: the same input always yields the same error. Cleared by the
/// next successful translation or a deletion of the resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("unknown schema version: {0:?}")]
    UnknownSchemaVersion(String),

    #[error("malformed {kind} spec: {reason}")]
    MalformedSpec { kind: &'static str, reason: String },

    #[error("invalid config for plugin {plugin:?}: {reason}")]
    InvalidPluginConfig { plugin: String, reason: String },

    #[error("plugin {0:?} listed more than once")]
    DuplicatePlugin(String),
}

/// Failure of an admin-API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Connection failure, timeout, 5xx, 429, 408
    #[error("transient admin error: {0}")]
    Transient(String),

    /// Any other 4xx, or a response that cannot be decoded
    #[error("permanent admin error: {0}")]
    Permanent(String),
}

impl AdminError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdminError::Transient(_))
    }
}

/// A task arrived with a generation older than one already accepted for its id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stale task for {id}: generation {got} < high water {high_water}")]
pub struct ConsistencyViolation {
    pub id: String,
    pub got: u64,
    pub high_water: u64,
}

/// Reasons an event or task was refused by the sync engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyViolation),
}

/// Tether controller errors (startup and wiring)
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Admin API error: {0}")]
    Admin(#[from] AdminError),

    #[error("CRD generation error: {0}")]
    Crd(#[from] kube::core::crd::MergeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
