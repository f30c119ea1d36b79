//! Error type shared by capture, artifact I/O and restore.
//!
//! Only conditions that make a snapshot or a restore wrong are errors. Values
//! that merely cannot be captured faithfully degrade to placeholders in the
//! encoder and never show up here.
use std::path::PathBuf;

use thiserror::Error;

use crate::ir::Symbol;

#[derive(Debug, Error)]
pub enum Error {
    // ---- capture ----
    #[error("unsupported value kind `{kind}` encountered during snapshotting")]
    UnsupportedValueKind { kind: String },

    // ---- artifact I/O ----
    #[error("failed to write artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read artifact {}: {source}", path.display())]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("symbol {0} is used before it is allocated")]
    UndefinedSymbol(Symbol),
    #[error("symbol {0} is allocated more than once")]
    DuplicateSymbol(Symbol),

    // ---- type registry / runtime ----
    #[error("invalid {what} `{name}`")]
    InvalidName { what: &'static str, name: String },
    #[error("type `{0}` is already registered")]
    DuplicateType(String),
    #[error("type `{ty}` refers to `{target}`, which is not a registered {expected}")]
    InvalidReference { ty: String, target: String, expected: &'static str },
    #[error("type `{0}` is not registered")]
    UnknownType(String),
    #[error("type `{0}` cannot be instantiated")]
    NotInstantiable(String),
    #[error("type `{ty}` has no instance field `{field}` owned by `{owner}`")]
    UnknownField { ty: String, owner: String, field: String },
    #[error("type `{ty}` owns no static slot `{name}`")]
    UnknownStatic { ty: String, name: String },
    #[error("type `{0}` is not an enum")]
    NotAnEnum(String),
    #[error("enum `{ty}` has no variant `{variant}`")]
    UnknownVariant { ty: String, variant: String },
    #[error("enum `{ty}` has no variant backed by {backing}")]
    UnmatchedBacking { ty: String, backing: String },

    // ---- restore ----
    #[error("symbol {0} does not refer to an instance")]
    NotAnInstance(Symbol),
    #[error("no reviver registered for handle kind `{0}`")]
    UnknownHandleKind(String),
    #[error("invalid arguments for `{kind}` handle: {message}")]
    ReviveArguments { kind: String, message: String },

    // ---- configuration / facade ----
    #[error("invalid snapshot options: {0}")]
    Options(String),
    #[error("library is not installed; install a package on the facade first")]
    NotInstalled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
