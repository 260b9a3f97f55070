// ============================================================
// Layer 5 — Model Errors
// ============================================================
// Typed failures for building, serialising and restoring
// models. Every variant carries enough structure to point at
// the offending node: `path` is a JSON-pointer-like location
// in the model document such as "/sublayers/2".
//
// The application layer wraps these in anyhow with context;
// inside the ML layer they stay typed so tests can match on
// the exact failure.

use serde_json::Value;

use crate::domain::decoding::ScoreWidthError;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown layer type '{name}' at {path}")]
    UnknownLayerType { name: String, path: String },

    #[error("malformed model document at {path}: {reason}")]
    MalformedDocument { path: String, reason: String },

    #[error("failed to build layer of type '{layer_type}' with args {args}")]
    LayerConstruction {
        layer_type: String,
        args:       Value,
        #[source]
        source:     ConstructionFailure,
    },

    #[error("invalid tensor data: {0}")]
    TensorData(String),

    #[error("cannot serialise layer config: {0}")]
    Config(String),

    #[error("invalid model config: {0}")]
    InvalidModel(String),

    #[error(transparent)]
    Decode(#[from] ScoreWidthError),
}

/// Why a layer constructor rejected its arguments.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionFailure {
    #[error(transparent)]
    Arguments(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
