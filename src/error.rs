use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcdsaFoldError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Signature at index {index} does not verify")]
    InvalidSignature { index: usize },

    #[error("No signatures supplied")]
    EmptyInput,

    #[error("Malformed prover state: {0}")]
    MalformedState(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EcdsaFoldError>;

impl EcdsaFoldError {
    /// Stable short name of the error kind, relayed verbatim by hosting transports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "InvalidParameters",
            Self::InvalidSignature { .. } => "InvalidSignature",
            Self::EmptyInput => "EmptyInput",
            Self::MalformedState(_) => "MalformedState",
            Self::SerializationError(_) => "SerializationError",
            Self::ResourceExhausted(_) => "ResourceExhausted",
            Self::IoError(_) => "IoError",
        }
    }
}

impl From<ark_serialize::SerializationError> for EcdsaFoldError {
    fn from(err: ark_serialize::SerializationError) -> Self {
        Self::SerializationError(format!("Canonical decoding error: {:?}", err))
    }
}

impl From<serde_json::Error> for EcdsaFoldError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for EcdsaFoldError {
    fn from(err: hex::FromHexError) -> Self {
        Self::SerializationError(format!("Hex error: {}", err))
    }
}

impl From<rayon::ThreadPoolBuildError> for EcdsaFoldError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::ResourceExhausted(format!("Worker pool error: {}", err))
    }
}
