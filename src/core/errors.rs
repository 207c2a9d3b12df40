use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("Line {line}: expected two numeric columns, got {text:?}")]
    Malformed { line: usize, text: String },

    #[error("Line {line}: negative voltage {value}")]
    NegativeVoltage { line: usize, value: f64 },

    #[error("Could not read voltage log: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("Trace has {samples} samples, need at least {classes}")]
    InsufficientSamples { samples: usize, classes: usize },

    #[error("Clustering did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssignmentError {
    #[error("Cluster {0} has no polarization assigned")]
    Unmapped(usize),

    #[error("Clusters {first} and {second} are both assigned to {symbol}")]
    Ambiguous {
        symbol: char,
        first: usize,
        second: usize,
    },

    #[error("Exactly one cluster must be noise, found {0}")]
    NoiseCount(usize),

    #[error("Cluster {0} is assigned to noise but appears in the symbol run")]
    NoiseInRun(usize),

    #[error("Unknown symbol letter {0:?}")]
    UnknownLetter(char),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Trace has {trace} samples but assignment has {labels} labels")]
    LengthMismatch { trace: usize, labels: usize },

    #[error("Label {label} at sample {index} is outside {num_classes} classes")]
    LabelOutOfRange {
        index: usize,
        label: usize,
        num_classes: usize,
    },

    #[error("Invalid bit {0:?}")]
    InvalidBit(char),

    #[error("Invalid hex digit {0:?}")]
    InvalidHex(char),

    #[error("Invalid sequence code {0:?}")]
    InvalidCode(char),

    #[error("Truncated reply: expected {expected} values, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Round produced {0} bits, not a whole number of 16-bit blocks")]
    PartialBlock(usize),

    #[error("Round produced {0} bits, more blocks than a round can announce")]
    RoundTooLong(usize),

    #[error("Unexpected packet: expected {expected:?}, got {got:?}")]
    UnexpectedPacket { expected: String, got: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Channel closed by peer")]
    Closed,

    #[error("Transport failure: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconciliationError {
    #[error("Mask of {mask} bits does not match key of {key} bits in 16-bit blocks")]
    MaskLengthMismatch { key: usize, mask: usize },
}

/// A mask string that is either not hex or not whole blocks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Length(#[from] ReconciliationError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config field {field} must be {expected}, got {value}")]
    Invalid {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Anything that can abandon a single key-exchange round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoundError {
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Mask error: {0}")]
    Mask(#[from] MaskParseError),

    #[error("Key has {bits} of {target} bits after {attempts} rounds")]
    AttemptsExhausted {
        attempts: usize,
        bits: usize,
        target: usize,
    },
}

impl RoundError {
    /// Taxonomy name reported to the operator.
    pub fn kind(&self) -> &'static str {
        match self {
            RoundError::Classification(_) => "ClassificationError",
            RoundError::Assignment(_) => "AssignmentError",
            RoundError::Decode(_) => "DecodeError",
            RoundError::Channel(ChannelError::Timeout(_)) => "ChannelTimeout",
            RoundError::Channel(_) => "ChannelError",
            RoundError::Reconciliation(_) => "MaskLengthMismatch",
            RoundError::Mask(MaskParseError::Decode(_)) => "DecodeError",
            RoundError::Mask(MaskParseError::Length(_)) => "MaskLengthMismatch",
            RoundError::AttemptsExhausted { .. } => "AttemptsExhausted",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session cancelled at attempt {attempt}")]
    Cancelled { attempt: usize },

    #[error("{} at attempt {attempt}: {source}", .source.kind())]
    Failed {
        attempt: usize,
        #[source]
        source: RoundError,
    },
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Cancelled { .. } => "Cancelled",
            SessionError::Failed { source, .. } => source.kind(),
        }
    }

    /// Round number the session was in when it stopped (0 is the handshake).
    pub fn attempt(&self) -> usize {
        match self {
            SessionError::Cancelled { attempt } | SessionError::Failed { attempt, .. } => *attempt,
        }
    }
}

/// Errors of the offline intercept workflow.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterceptError {
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Mask error: {0}")]
    Mask(#[from] MaskParseError),

    #[error("Key has {bits} of {target} bits after {attempts} rounds")]
    AttemptsExhausted {
        attempts: usize,
        bits: usize,
        target: usize,
    },
}
