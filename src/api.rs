use crate::analyzer::{Analyzer, CompletionInfo, HoverInfo};
use crate::ast::NodeId;
use crate::config::AnalyzerConfig;
use crate::cursor::{find_node_at, FindFailure};
use crate::error::AnalysisError;
use crate::location::Location;
use crate::serialization::{to_dump, TreeDump};
use crate::service::{CachedDocument, DocumentCache, ParseFailure};
use crate::visitor::AnnotatedAst;
use crate::workspace::InMemoryDocumentStore;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;

/// The result of a successful analysis of one Jsonnet document.
/// It keeps the annotated tree and an analyzer over an in-memory store,
/// so it can answer the same cursor queries an editor would send.
pub struct AnalysisResult {
    pub uri: String,
    pub tree: Arc<AnnotatedAst>,
    analyzer: Analyzer<InMemoryDocumentStore>,
}

impl Serialize for AnalysisResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_dump().serialize(serializer)
    }
}

impl AnalysisResult {
    /// Flattens the annotated tree: every node with its range, parent,
    /// names in scope and root object.
    #[must_use]
    pub fn to_dump(&self) -> TreeDump {
        to_dump(&self.tree)
    }

    /// Serializes the annotated tree into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the annotated tree into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }

    /// Makes another document importable from this one. Relative paths are
    /// taken from the root directory.
    pub fn add_document(&mut self, path: impl AsRef<Path>, text: &str) -> String {
        self.analyzer.store_mut().insert(path, text)
    }

    /// The identifier under `cursor`.
    pub fn node_at(&self, cursor: Location) -> Result<NodeId, FindFailure> {
        find_node_at(&self.tree, self.tree.root, cursor)
    }

    pub fn hover_at(&mut self, cursor: Location) -> HoverInfo {
        self.analyzer.on_hover(&self.uri, cursor)
    }

    pub fn completions_at(&mut self, cursor: Location) -> Vec<CompletionInfo> {
        self.analyzer.on_complete(&self.uri, cursor)
    }
}

/// Lexes, parses and annotates a Jsonnet source string.
///
/// # Arguments
///
/// * `source` - The Jsonnet source code as a string.
/// * `file_name` - The name of the file being analyzed (used for error reporting
///   and as the base of relative imports).
///
/// # Errors
///
/// Returns an `AnalysisError` if lexing or parsing fails; it renders the
/// source around the failure.
pub fn analyze(source: &str, file_name: &str) -> Result<AnalysisResult, AnalysisError> {
    let path = Path::new("/").join(file_name);
    let mut store = InMemoryDocumentStore::new();
    let uri = store.insert(&path, source);
    let mut analyzer = Analyzer::new(store, DocumentCache::new(), AnalyzerConfig::default());

    let tree = match analyzer.compile(&uri)? {
        CachedDocument::Parsed(doc) => doc.tree.clone(),
        CachedDocument::Failed(doc) => {
            return Err(match &doc.failure {
                ParseFailure::Lex(failure) => {
                    AnalysisError::lex(file_name, source, failure.error.clone())
                }
                ParseFailure::Parse { error, .. } => {
                    AnalysisError::parse(file_name, source, error.clone())
                }
            })
        }
    };

    Ok(AnalysisResult {
        uri,
        tree,
        analyzer,
    })
}
