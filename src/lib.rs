pub mod analyzer;
pub mod api;
pub mod ast;
pub mod config;
pub mod cursor;
pub mod error;
pub mod lexer;
pub mod location;
#[cfg(feature = "lsp")]
pub mod lsp;
pub mod parser;
pub mod resolver;
pub mod serialization;
pub mod service;
pub mod utils;
pub mod visitor;
pub mod workspace;

pub use analyzer::{Analyzer, CompletionInfo, CompletionKind, HoverInfo};
pub use api::{analyze, AnalysisResult};
pub use config::AnalyzerConfig;
pub use error::{AnalysisError, StaticError};
pub use location::{Location, LocationRange};
