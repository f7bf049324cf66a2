use thiserror::Error;

/// Authentication failure surfaced from login.
///
/// Invalid credentials are kept distinguishable from transport and server
/// causes so callers can show a precise message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials rejected by the homeserver.
    #[error("Invalid username or password.")]
    InvalidCredentials,
    /// Transport-level failure before the server could answer.
    #[error("network failure during login: {0}")]
    Network(String),
    /// The homeserver answered with a non-credential failure.
    #[error("homeserver error: {0}")]
    Server(String),
}

/// The live event stream could not be established.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to establish event stream: {0}")]
pub struct ConnectionError(pub String);

/// Cryptographic subsystem bootstrap failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoInitError {
    /// Generic initialization failure; retrying later may recover.
    #[error("crypto subsystem failed to initialize: {0}")]
    Init(String),
    /// The local crypto store no longer matches the account. Recovering
    /// requires dropping all locally cached cryptographic material.
    #[error("stale local crypto store: {0}")]
    StaleStore(String),
}

impl CryptoInitError {
    /// Whether this failure is the stale-store signature that triggers the
    /// destructive local-state reset.
    pub fn is_stale_store(&self) -> bool {
        matches!(self, Self::StaleStore(_))
    }
}

/// Failure or cancellation during the verification handshake.
///
/// Always carries a human-readable reason; the coordinator resolves every
/// instance to the Cancelled state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct VerificationError(pub String);

impl VerificationError {
    /// Wrap a reason string.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The other party cancelled the attempt.
    pub fn remote_cancelled() -> Self {
        Self::new("Verification cancelled by other party.")
    }

    /// The human-readable reason.
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Raw failure reported by a collaborator capability, before classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("remote call failed: {message}")]
pub struct RemoteError {
    /// HTTP status when the failure came from a server response.
    pub http_status: Option<u16>,
    /// Collaborator-provided failure message.
    pub message: String,
}

impl RemoteError {
    /// Failure with no server response (transport-level).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            message: message.into(),
        }
    }

    /// Failure carrying an HTTP status from the server.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            message: message.into(),
        }
    }
}

/// Classify a collaborator login failure into the auth taxonomy.
///
/// 401/403 map to invalid credentials; any other status is a server
/// failure; no status at all is a transport failure.
pub fn classify_login_failure(err: &RemoteError) -> AuthError {
    match err.http_status {
        Some(401 | 403) => AuthError::InvalidCredentials,
        Some(status) => AuthError::Server(format!("status {status}: {}", err.message)),
        None => AuthError::Network(err.message.clone()),
    }
}

/// Umbrella error for session lifecycle calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The live stream could not be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Crypto bootstrap failed without a recovery path.
    #[error(transparent)]
    Crypto(#[from] CryptoInitError),
    /// Credential persistence failed.
    #[error("credential store failure: {0}")]
    Store(String),
    /// Local crypto state was destructively reset; the process must be
    /// restarted before the session can be established again.
    #[error("local crypto state was reset; a full restart is required")]
    RestartRequired,
}
