//! # Synbind Core
//!
//! Shared types and utilities for binding simulator state to engine memory.
//!
//! ## Contents
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`types`] | Scalar types, precision, variable locations, matrix types |
//! | [`values`] | Staged values, initialisers, typed host buffers and views |
//! | [`record`] | Variable and extra global parameter records |
//! | [`model`] | Model descriptors, model families and the model registry |
//! | [`config`] | Binding configuration |
//!
//! ## Design Philosophy
//!
//! 1. The engine owns memory, groups only hold views onto it
//! 2. Every staged value is checked before anything is bound
//! 3. `"scalar"` is resolved to a concrete precision in exactly one place

use thiserror::Error;

pub mod config;
pub mod model;
pub mod record;
pub mod types;
pub mod values;

pub use config::BindingConfig;
pub use model::{
    var_space_to_vals, EgpDecl, ModelDescriptor, ModelFamily, ModelInit, ModelRegistry,
    ModelRole, ModelSource, ParamSpace, PreparedModel, RegistryFamily, VarDecl, VarSpace,
};
pub use record::{EgpMap, EgpValues, ExtraGlobalParam, VarMap, Variable};
pub use types::{ConnectivityKind, MatrixType, Precision, ScalarType, VarLocation};
pub use values::{check_representable, HostArray, HostView, VarInitialiser, VarValues};

/// Common errors
#[derive(Debug, Error)]
pub enum BindError {
    #[error("Unknown variable '{name}' in group '{group}'")]
    UnknownVariable { group: String, name: String },

    #[error("Unknown extra global parameter '{name}' in group '{group}'")]
    UnknownExtraGlobalParam { group: String, name: String },

    #[error("Unknown parameter '{name}' for model '{model}'")]
    UnknownParameter { model: String, name: String },

    #[error("Missing parameter '{name}' for model '{model}'")]
    MissingParameter { model: String, name: String },

    #[error("Unknown {role} model: {kind}")]
    UnknownModel { role: ModelRole, kind: String },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Variable '{name}' in group '{group}' is device-only and cannot be initialised from the host")]
    InitOnDeviceOnlyVariable { group: String, name: String },

    #[error("Variable '{name}' in group '{group}' has no host view")]
    DeviceOnlyVariable { group: String, name: String },

    #[error("Connectivity of synapse group '{0}' must be set before loading")]
    ConnectivityNotSet(String),

    #[error("Operation '{operation}' is not supported by the matrix format of group '{group}'")]
    UnsupportedFormat { group: String, operation: String },

    #[error("Connectivity of synapse group '{0}' is not accessible from the host")]
    ConnectivityNotAccessible(String),

    #[error("Invalid matrix type: {0}")]
    InvalidMatrixType(String),

    #[error("Size mismatch for '{name}': expected {expected}, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Index {index} out of range for population of size {size}")]
    IndexOutOfRange { index: usize, size: usize },

    #[error("Value {value} cannot be represented as {target}")]
    ValueConversion { value: f64, target: ScalarType },

    #[error("No model has been set on group '{0}'")]
    ModelNotSet(String),

    #[error("Group '{0}' has not been added to a model")]
    NotAdded(String),

    #[error("Group '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Group '{0}' has not been loaded")]
    NotLoaded(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BindError>;

/// Engine-side name of a group member: member name followed by group name
pub fn qualified_name(member: &str, group: &str) -> String {
    format!("{}{}", member, group)
}
