//! Error taxonomy for the session lifecycle and generation engine.

use llmshim_engine::EngineError;
use llmshim_sampling::SamplingError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure class carried across the C boundary in the error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Model load or context allocation failed.
    General = 1,
    InvalidArgument = 2,
    Tokenize = 3,
    SamplerConstruction = 4,
    Encode = 5,
    /// Priming, per-token decode, or sampling failed.
    Decode = 6,
    TokenText = 7,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgument(String),

    #[error("failed to load model: {0}")]
    ModelLoad(#[source] EngineError),

    #[error("failed to create context: {0}")]
    ContextInit(#[source] EngineError),

    #[error("tokenization overflow")]
    TokenizeOverflow,

    #[error("prompt produced no tokens")]
    EmptyPrompt,

    #[error("failed to tokenize prompt: {0}")]
    Tokenize(#[source] EngineError),

    #[error("failed to construct sampler chain: {0}")]
    SamplerConstruction(#[source] SamplingError),

    #[error("encoder evaluation failed: {0}")]
    Encode(#[source] EngineError),

    #[error("failed to evaluate prompt: {0}")]
    Prime(#[source] EngineError),

    #[error("failed to sample next token: {0}")]
    Sample(#[source] SamplingError),

    #[error("failed to convert token to text: {0}")]
    TokenText(#[source] EngineError),

    #[error("failed to evaluate generated token: {0}")]
    DecodeToken(#[source] EngineError),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::ModelLoad(_) | Error::ContextInit(_) => ErrorCode::General,
            Error::TokenizeOverflow | Error::EmptyPrompt | Error::Tokenize(_) => {
                ErrorCode::Tokenize
            }
            Error::SamplerConstruction(_) => ErrorCode::SamplerConstruction,
            Error::Encode(_) => ErrorCode::Encode,
            Error::Prime(_) | Error::Sample(_) | Error::DecodeToken(_) => ErrorCode::Decode,
            Error::TokenText(_) => ErrorCode::TokenText,
        }
    }

    pub(crate) fn from_tokenize(err: EngineError) -> Self {
        match err {
            EngineError::TokenOverflow => Error::TokenizeOverflow,
            other => Error::Tokenize(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::General.as_i32(), 1);
        assert_eq!(ErrorCode::InvalidArgument.as_i32(), 2);
        assert_eq!(ErrorCode::Tokenize.as_i32(), 3);
        assert_eq!(ErrorCode::SamplerConstruction.as_i32(), 4);
        assert_eq!(ErrorCode::Encode.as_i32(), 5);
        assert_eq!(ErrorCode::Decode.as_i32(), 6);
        assert_eq!(ErrorCode::TokenText.as_i32(), 7);
    }

    #[test]
    fn classification() {
        let decode = || EngineError::Decode("context full".into());
        assert_eq!(Error::ModelLoad(decode()).code(), ErrorCode::General);
        assert_eq!(Error::ContextInit(decode()).code(), ErrorCode::General);
        assert_eq!(Error::EmptyPrompt.code(), ErrorCode::Tokenize);
        assert_eq!(Error::Prime(decode()).code(), ErrorCode::Decode);
        assert_eq!(Error::DecodeToken(decode()).code(), ErrorCode::Decode);
        assert_eq!(
            Error::Sample(SamplingError::NoValidTokens).code(),
            ErrorCode::Decode
        );
    }

    #[test]
    fn overflow_is_distinguished() {
        assert!(matches!(
            Error::from_tokenize(EngineError::TokenOverflow),
            Error::TokenizeOverflow
        ));
        assert!(matches!(
            Error::from_tokenize(EngineError::Tokenization("bad".into())),
            Error::Tokenize(_)
        ));
    }

    #[test]
    fn messages_lead_with_failure_class() {
        assert_eq!(Error::TokenizeOverflow.to_string(), "tokenization overflow");
        assert_eq!(Error::EmptyPrompt.to_string(), "prompt produced no tokens");
        assert_eq!(
            Error::Prime(EngineError::Decode("context full".into())).to_string(),
            "failed to evaluate prompt: decode failed: context full"
        );
    }
}
