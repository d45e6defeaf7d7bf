//! Per-component error types.
//!
//! Each fallible subsystem gets its own `thiserror` enum so call sites can match on
//! specific failure kinds; the CLI entry point collapses all of them into `anyhow::Error`.

use thiserror::Error;

/// Failures loading or validating an [`AppConfig`](crate::config::AppConfig) or controller descriptor.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("descriptor row arrays have inconsistent lengths: NumRows={num_rows} but RowLengths has {row_lengths} entries")]
    RowLengthMismatch { num_rows: usize, row_lengths: usize },
}

/// Failures parsing or evaluating a descriptor template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template has unmatched `{{#for}}` / `{{#end}}`")]
    UnbalancedLoop,
    #[error("macro `{0}` recurses through itself")]
    Recursion(String),
    #[error("malformed expression: {0}")]
    MalformedExpression(String),
    #[error("dotted field access `{0}` is not supported; bind loop fields as bare names (e.g. `noteNumber`, not `pad.noteNumber`)")]
    DottedFieldAccess(String),
}

/// Failures in a layout calculator.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("transform is not unimodular after edit (det = {0})")]
    NotUnimodular(i64),
    #[error("unknown transformation kind `{0}` for this layout")]
    UnknownTransformation(String),
}

/// Failures in the MIDI I/O core.
#[derive(Debug, Error)]
pub enum MidiCoreError {
    #[error("failed to initialize MIDI input: {0}")]
    InputInit(String),
    #[error("failed to initialize MIDI output: {0}")]
    OutputInit(String),
    #[error("no input ports available")]
    NoInputPorts,
    #[error("port not found matching `{0}`")]
    PortNotFound(String),
    #[error("failed to connect: {0}")]
    Connection(String),
    #[error("failed to query port info: {0}")]
    PortInfo(String),
}
