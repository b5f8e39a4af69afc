use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Another writer won the CAS race. Retried internally up to the
    /// attempt budget; surfaced only once the budget is spent.
    VersionConflict,
    /// No qualifying slots exist for the request. Terminal, never retried.
    SlotUnavailable,
    /// The session's courtesy lock has lapsed. Informational; only the
    /// soft-hold check returns this.
    ReservationExpired,
    /// The caller's deadline passed. Any partial hold was rolled back
    /// before this was returned.
    DeadlineExceeded,
    NotFound(Ulid),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::VersionConflict => {
                write!(f, "version conflict: a concurrent write won, try again")
            }
            EngineError::SlotUnavailable => write!(f, "no qualifying slots for the request"),
            EngineError::ReservationExpired => write!(f, "session reservation has expired"),
            EngineError::DeadlineExceeded => write!(f, "deadline exceeded"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
