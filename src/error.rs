use crate::ast::Ast;
use crate::location::{Location, LocationRange};
use crate::utils::offset_of;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

/// A lex or parse failure: a message, where it happened, and for some parse
/// failures the best-effort tree built before the failure.
#[derive(Error, Debug, Clone)]
#[error("{loc} {msg}")]
pub struct StaticError {
    pub msg: String,
    pub loc: LocationRange,
    pub rest: Option<Box<Ast>>,
}

impl StaticError {
    pub fn point(msg: impl Into<String>, file_name: &str, loc: Location) -> Self {
        StaticError {
            msg: msg.into(),
            loc: LocationRange::point(file_name, loc),
            rest: None,
        }
    }

    pub fn range(msg: impl Into<String>, loc: LocationRange) -> Self {
        StaticError {
            msg: msg.into(),
            loc,
            rest: None,
        }
    }

    pub fn with_rest(msg: impl Into<String>, loc: LocationRange, rest: Ast) -> Self {
        StaticError {
            msg: msg.into(),
            loc,
            rest: Some(Box::new(rest)),
        }
    }

    /// Byte span of the error inside `source`, for report rendering.
    pub fn span_in(&self, source: &str) -> SourceSpan {
        let start = offset_of(source, self.loc.begin);
        let end = offset_of(source, self.loc.end).max(start);
        (start, end - start).into()
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum AnalysisError {
    #[error("{message}")]
    #[diagnostic(
        code(jsonnet::lex_error),
        help("The lexer could not split this text into tokens.")
    )]
    Lex {
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
        message: String,
        error: StaticError,
    },

    #[error("{message}")]
    #[diagnostic(
        code(jsonnet::parse_error),
        help("The parser found a token it did not expect in this position.")
    )]
    Parse {
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
        message: String,
        error: StaticError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl AnalysisError {
    pub fn lex(file_name: &str, source: &str, error: StaticError) -> Self {
        AnalysisError::Lex {
            src: NamedSource::new(file_name, source.to_string()),
            span: error.span_in(source),
            message: error.to_string(),
            error,
        }
    }

    pub fn parse(file_name: &str, source: &str, error: StaticError) -> Self {
        AnalysisError::Parse {
            src: NamedSource::new(file_name, source.to_string()),
            span: error.span_in(source),
            message: error.to_string(),
            error,
        }
    }

    /// The underlying static error, when this is a lex or parse failure.
    pub fn static_error(&self) -> Option<&StaticError> {
        match self {
            AnalysisError::Lex { error, .. } | AnalysisError::Parse { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum DocumentError {
    #[error("Document not found: {path}")]
    #[diagnostic(
        code(document::not_found),
        help("Check that the file exists, or add its directory to the library paths.")
    )]
    NotFound { path: String },

    #[error("Failed to read {path}: {reason}")]
    #[diagnostic(code(document::read))]
    Read { path: PathBuf, reason: String },

    #[error("Unsupported document URI: {uri}")]
    #[diagnostic(
        code(document::invalid_uri),
        help("Only file:// URIs and plain paths are supported.")
    )]
    InvalidUri { uri: String },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    #[diagnostic(code(config::io))]
    Io { path: PathBuf, reason: String },

    #[error("Invalid JSON configuration: {0}")]
    #[diagnostic(code(config::json))]
    Json(String),

    #[error("Invalid YAML configuration: {0}")]
    #[diagnostic(code(config::yaml))]
    Yaml(String),

    #[error("Unsupported config format: {path}")]
    #[diagnostic(
        code(config::unsupported_format),
        help("Use a .json, .yaml or .yml file.")
    )]
    UnsupportedFormat { path: PathBuf },
}
