use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Customer or appointment id absent.
    NotFound(Ulid),
    UnknownService(String),
    AlreadyExists(Ulid),
    /// The requested slot overlaps this committed appointment.
    Conflict(Ulid),
    Validation(String),
    LimitExceeded(&'static str),
    /// The WAL write did not complete; nothing from the request was applied.
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UnknownService(code) => write!(f, "unknown service: {code}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
