use crate::analyzer::Analyzer;
use crate::ast::NodeKind;
use crate::location::{Location, LocationRange};
use crate::service::{CachedDocument, CompilerService, FailedParsedDocument};
use crate::visitor::AnnotatedAst;
use crate::workspace::DocumentStore;
use log::debug;
use serde::Serialize;

/// A 0-based line and character, as editors count them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

impl From<Position> for Location {
    fn from(pos: Position) -> Location {
        Location::new(pos.line + 1, pos.character + 1)
    }
}

impl From<Location> for Position {
    fn from(loc: Location) -> Position {
        Position::new(loc.line.saturating_sub(1), loc.column.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl From<&LocationRange> for Range {
    fn from(loc: &LocationRange) -> Range {
        let start = Position::from(loc.begin);
        let end = if loc.end.is_set() {
            Position::from(loc.end).max(start)
        } else {
            start
        };
        Range { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub range: Range,
    pub message: String,
    pub source: String,
}

impl Diagnostic {
    fn new(severity: DiagnosticSeverity, loc: &LocationRange, message: String) -> Self {
        Diagnostic {
            severity,
            range: Range::from(loc),
            message,
            source: "Jsonnet".to_string(),
        }
    }
}

fn missing_import_message(file: &str) -> String {
    format!(
        "Can't find path '{file}'. If the file is not in the current directory, it may be \
         necessary to add it to the 'jsonnet.libPaths'. If you are in vscode, you can press \
         'cmd/ctrl-,' and add the path this library is located at to the 'jsonnet.libPaths' array"
    )
}

/// The single error of a document that failed to lex or parse.
pub fn from_failure(failed: &FailedParsedDocument) -> Diagnostic {
    let error = failed.failure.error();
    Diagnostic::new(DiagnosticSeverity::Error, &error.loc, error.msg.clone())
}

/// Warnings for imports in `tree` that cannot be found from `uri`.
pub fn from_ast(tree: &AnnotatedAst, uri: &str, store: &dyn DocumentStore) -> Vec<Diagnostic> {
    tree.subtree(tree.root)
        .into_iter()
        .filter_map(|id| match tree.kind(id) {
            NodeKind::Import { file } | NodeKind::ImportStr { file } => {
                if store.resolve_import(file, uri).is_some() {
                    return None;
                }
                debug!("import '{file}' in {uri} not found");
                Some(Diagnostic::new(
                    DiagnosticSeverity::Warning,
                    tree.loc(id),
                    missing_import_message(file),
                ))
            }
            _ => None,
        })
        .collect()
}

pub fn diagnostics_for(
    doc: &CachedDocument,
    uri: &str,
    store: &dyn DocumentStore,
) -> Vec<Diagnostic> {
    match doc {
        CachedDocument::Parsed(parsed) => from_ast(&parsed.tree, uri, store),
        CachedDocument::Failed(failed) => vec![from_failure(failed)],
    }
}

// === Document Events ===

impl<S: DocumentStore, C: CompilerService> Analyzer<S, C> {
    /// Current diagnostics for `uri`; a document the store cannot load has none.
    pub fn diagnostics(&mut self, uri: &str) -> Vec<Diagnostic> {
        match self.compile(uri) {
            Ok(doc) => diagnostics_for(&doc, uri, self.store()),
            Err(e) => {
                debug!("no diagnostics for {uri}: {e}");
                Vec::new()
            }
        }
    }

    pub fn on_document_open(&mut self, uri: &str, text: &str, version: Option<i64>) -> Vec<Diagnostic> {
        let doc = self.open(uri, text, version);
        diagnostics_for(&doc, uri, self.store())
    }

    /// Edits and saves both replace the editor text.
    pub fn on_document_save(&mut self, uri: &str, text: &str, version: Option<i64>) -> Vec<Diagnostic> {
        self.on_document_open(uri, text, version)
    }

    /// Clears diagnostics for a closed document.
    pub fn on_document_close(&mut self, uri: &str) -> Vec<Diagnostic> {
        self.close(uri);
        Vec::new()
    }
}
