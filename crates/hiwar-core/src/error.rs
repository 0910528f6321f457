use thiserror::Error;

#[derive(Debug, Error)]
pub enum HiwarError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl HiwarError {
    /// Returns `true` when the error indicates the storage medium ran out
    /// of capacity (disk full, SQLITE_FULL, exceeded quota).
    pub fn is_storage_full(&self) -> bool {
        match self {
            Self::Storage(msg) => is_capacity_message(msg),
            _ => false,
        }
    }
}

fn is_capacity_message(msg: &str) -> bool {
    let msg_lower = msg.to_lowercase();
    let patterns = [
        "disk full",
        "database or disk is full",
        "no space left on device",
        "os error 28",
        "quota exceeded",
        "sqlite_full",
    ];
    patterns.iter().any(|p| msg_lower.contains(p))
}

pub type Result<T> = std::result::Result<T, HiwarError>;

/// Why a completion request failed, from the caller's point of view.
///
/// Classification happens once, in the response-parsing step; everything
/// downstream (store error state, synthesized assistant messages) works
/// off the kind rather than re-inspecting transport details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    Auth,
    RateLimit,
    Quota,
    Connectivity,
    Unknown,
}

impl CompletionErrorKind {
    /// The user-facing string surfaced in the conversation when a request
    /// with this failure kind is turned into an assistant message.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Auth => "Authentication failed. Check that your API key is valid.",
            Self::RateLimit => "Rate limit exceeded. Wait a moment before sending again.",
            Self::Quota => "Quota exhausted. Check your plan and billing details.",
            Self::Connectivity => {
                "Could not reach the completion endpoint. Check your network connection."
            }
            Self::Unknown => "The completion request failed unexpectedly.",
        }
    }
}

impl std::fmt::Display for CompletionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Quota => write!(f, "quota"),
            Self::Connectivity => write!(f, "connectivity"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified completion failure: the kind drives user-facing behavior,
/// the detail preserves the transport-level cause for logs.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub detail: String,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// The string shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}
