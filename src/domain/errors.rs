use thiserror::Error;

/// Rejected domain values (prices, enum tags read back from storage).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Unknown market type: {0}")]
    UnknownMarketType(String),

    #[error("Unknown position side: {0}")]
    UnknownSide(String),

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

/// Failures surfaced by a `TradingStore` implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Corrupt record: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an engine operation that did not go through.
///
/// Everything except `Store` is a business rejection the caller is expected to
/// branch on; `Store` means persistence itself failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stop-loss equals entry price, cannot size position")]
    DegenerateStop,

    #[error("Position size too small or insufficient balance")]
    PositionTooSmall,

    #[error("Position already open for {symbol}")]
    DuplicatePosition { symbol: String },

    #[error("Position not found")]
    PositionNotFound { position_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TradingError {
    /// True for validation/rejection outcomes, false for persistence failures
    pub fn is_rejection(&self) -> bool {
        !matches!(self, TradingError::Store(_))
    }

    /// Short stable code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            TradingError::InvalidInput(_) => "ERR_INVALID_INPUT",
            TradingError::DegenerateStop => "ERR_DEGENERATE_STOP",
            TradingError::PositionTooSmall => "ERR_POSITION_TOO_SMALL",
            TradingError::DuplicatePosition { .. } => "ERR_DUPLICATE_POSITION",
            TradingError::PositionNotFound { .. } => "ERR_POSITION_NOT_FOUND",
            TradingError::Store(_) => "ERR_STORE",
        }
    }
}

impl From<ValidationError> for TradingError {
    fn from(error: ValidationError) -> Self {
        TradingError::InvalidInput(error.to_string())
    }
}

/// Failure of an external collaborator (market data, AI advisor).
///
/// The variant decides how the resilience layer reacts: only `Transient` is
/// retried, `Quota` trips the circuit breaker for an extended cooldown.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExternalError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Quota exhausted: {0}")]
    Quota(String),

    #[error("Request rejected: {0}")]
    Permanent(String),

    #[error("Malformed response: {0}")]
    Parse(String),
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ExternalError::Quota(_))
    }
}
