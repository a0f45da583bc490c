use crate::ast::{NodeId, NodeKind, ObjectFieldKind};
use crate::config::AnalyzerConfig;
use crate::cursor::{find_node_at, FindFailure};
use crate::error::AnalysisError;
use crate::location::Location;
use crate::resolver::{Fields, NodeRef, ResolutionContext, ResolveFailure, ResolvedValue};
use crate::service::{CachedDocument, CompilerService, DocumentCache, FailedParsedDocument, ParseFailure};
use crate::utils::line_text;
use crate::visitor::{AnnotatedAst, Environment};
use crate::workspace::{DocumentStore, FileSpec, FsDocumentStore, LibPathResolver};
use log::{debug, error, warn};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

// === Payloads ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageString {
    pub language: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MarkedString {
    Code(LanguageString),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HoverInfo {
    pub contents: Vec<MarkedString>,
}

impl HoverInfo {
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// The rendered code snippet, if any.
    pub fn code(&self) -> Option<&str> {
        self.contents.iter().find_map(|c| match c {
            MarkedString::Code(code) => Some(code.value.as_str()),
            MarkedString::Text(_) => None,
        })
    }

    /// The attached comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.contents.iter().find_map(|c| match c {
            MarkedString::Text(text) => Some(text.as_str()),
            MarkedString::Code(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionKind {
    Field,
    Variable,
    Method,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionInfo {
    pub label: String,
    pub kind: CompletionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

// === Analyzer ===

/// Answers hover and completion requests for the documents of one store.
///
/// Each analyzer owns its parse cache; analyzers running side by side must
/// not share one.
pub struct Analyzer<S: DocumentStore, C: CompilerService = DocumentCache> {
    store: S,
    service: C,
    config: AnalyzerConfig,
}

impl Analyzer<FsDocumentStore, DocumentCache> {
    /// An analyzer over the filesystem, searching imports in `working_dir`
    /// and the configured library paths.
    pub fn from_config(working_dir: impl Into<PathBuf>, config: AnalyzerConfig) -> Self {
        let resolver = LibPathResolver::new(working_dir, config.effective_lib_paths());
        Self::new(FsDocumentStore::new(resolver), DocumentCache::new(), config)
    }

    /// Applies new settings; only the library search paths depend on them.
    pub fn update_config(&mut self, config: AnalyzerConfig) {
        self.store.set_lib_paths(config.effective_lib_paths());
        self.config = config;
    }
}

impl<S: DocumentStore, C: CompilerService> Analyzer<S, C> {
    pub fn new(store: S, service: C, config: AnalyzerConfig) -> Self {
        Self {
            store,
            service,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn service(&self) -> &C {
        &self.service
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Fetches `uri` from the store and parses it through the cache.
    pub fn compile(&mut self, uri: &str) -> Result<CachedDocument, AnalysisError> {
        let doc = self.store.get(&FileSpec::Uri(uri.to_string()))?;
        Ok(self.service.cache(uri, &doc.text, doc.version))
    }

    /// Records editor text for `uri` and parses it.
    pub fn open(&mut self, uri: &str, text: &str, version: Option<i64>) -> CachedDocument {
        self.store.open(uri, text, version);
        self.service.cache(uri, text, version)
    }

    /// Forgets the editor text and every cached parse of `uri`.
    pub fn close(&mut self, uri: &str) {
        self.store.close(uri);
        self.service.delete(uri);
    }

    /// Hover text for the symbol under `cursor`. Never fails; errors and
    /// panics are logged and produce an empty result. A stack overflow
    /// still aborts the process.
    pub fn on_hover(&mut self, uri: &str, cursor: Location) -> HoverInfo {
        guarded("hover", uri, cursor, || self.hover(uri, cursor))
    }

    /// Completion candidates at `cursor`. Never fails; errors and panics
    /// are logged and produce no candidates.
    pub fn on_complete(&mut self, uri: &str, cursor: Location) -> Vec<CompletionInfo> {
        guarded("completion", uri, cursor, || self.complete(uri, cursor))
    }

    // === Hover ===

    fn hover(&mut self, uri: &str, cursor: Location) -> Result<HoverInfo, AnalysisError> {
        let CachedDocument::Parsed(doc) = self.compile(uri)? else {
            debug!("no hover for {uri}: document does not parse");
            return Ok(HoverInfo::default());
        };
        let tree = doc.tree.clone();

        let found = match node_at_position(&tree, tree.root, cursor) {
            Ok(id) => id,
            Err(failure) => {
                return Ok(match failure.tightest() {
                    Some(id) if matches!(tree.kind(id), NodeKind::FunctionParam { .. }) => {
                        render(&NodeRef::new(uri, tree.clone(), id))
                    }
                    _ => HoverInfo::default(),
                })
            }
        };

        let node = NodeRef::new(uri, tree.clone(), found);
        if let Some(parent) = node.parent() {
            if matches!(parent.kind(), NodeKind::FunctionParam { .. }) {
                return Ok(render(&parent));
            }
        }

        let mut ctx = ResolutionContext::new(&self.store, &mut self.service);
        Ok(match ctx.try_resolve_indirections(&node) {
            Err(ResolveFailure::FreeVar(target) | ResolveFailure::Function(target)) => {
                render(&target)
            }
            Err(_) => HoverInfo::default(),
            Ok(resolved) => match resolved.value {
                ResolvedValue::Node(value) => render(&value),
                ResolvedValue::Fields(fields) => match fields.first().and_then(NodeRef::parent) {
                    Some(object) => render(&object),
                    None => HoverInfo::default(),
                },
            },
        })
    }

    // === Completion ===

    fn complete(&mut self, uri: &str, cursor: Location) -> Result<Vec<CompletionInfo>, AnalysisError> {
        let doc = self.store.get(&FileSpec::Uri(uri.to_string()))?;
        let dot = last_char_is_dot(&doc.text, cursor);

        match self.service.cache(uri, &doc.text, doc.version) {
            CachedDocument::Parsed(parsed) => {
                let tree = parsed.tree.clone();
                let found = match node_at_position(&tree, tree.root, cursor) {
                    Ok(id) => id,
                    Err(FindFailure::NotIdentifier { .. }) => return Ok(Vec::new()),
                    Err(failure) => match analyzable_hint(&failure) {
                        Some(id) => id,
                        None => return Ok(Vec::new()),
                    },
                };
                Ok(self.completions_from_node(&NodeRef::new(uri, tree, found), dot))
            }
            CachedDocument::Failed(failed) => {
                Ok(self.completions_from_failed_parse(uri, &failed, cursor, dot))
            }
        }
    }

    /// Splices the partial tree of a failed parse into the last good parse
    /// and completes against the result.
    fn completions_from_failed_parse(
        &mut self,
        uri: &str,
        failed: &FailedParsedDocument,
        cursor: Location,
        dot: bool,
    ) -> Vec<CompletionInfo> {
        let ParseFailure::Parse { error, .. } = &failed.failure else {
            debug!("no completion for {uri}: document does not lex");
            return Vec::new();
        };
        let Some(rest) = error.rest.as_deref() else {
            debug!("no completion for {uri}: parse failure has no partial tree");
            return Vec::new();
        };
        let Some(last) = self.service.last_success(uri) else {
            debug!("no completion for {uri}: no earlier successful parse");
            return Vec::new();
        };

        let rest_loc = rest.loc(rest.root).clone();
        let rest_end = rest_loc.end;
        let mut cursor = cursor;
        let adjacent = cursor.line == rest_end.line && cursor.column == rest_end.column + 1;
        if !cursor.in_range(&rest_loc) && !adjacent {
            if !gap_is_blank(&failed.text, rest_end, cursor, dot) {
                debug!("no completion for {uri}: text between {rest_loc} and {cursor}");
                return Vec::new();
            }
            cursor = rest_end;
        }

        let tree = &last.tree;
        let found = match node_at_position(tree, tree.root, cursor) {
            Ok(id) => id,
            Err(failure) => match analyzable_hint(&failure) {
                Some(id) => id,
                None => return Vec::new(),
            },
        };
        let (grafted, root) = tree.graft(rest, found);
        debug!("completing {uri} against partial tree grafted at {}", tree.loc(found));
        self.completions_from_node(&NodeRef::new(uri, Arc::new(grafted), root), dot)
    }

    fn completions_from_node(&mut self, node: &NodeRef, dot: bool) -> Vec<CompletionInfo> {
        let mut ctx = ResolutionContext::new(&self.store, &mut self.service);
        match ctx.try_resolve_indirections(node) {
            Err(ResolveFailure::Unresolved) => env_completions(&node.tree.env(node.id)),
            Err(ResolveFailure::IndexId { fields, .. }) => field_completions(&fields),
            Err(
                ResolveFailure::IndexTarget(_)
                | ResolveFailure::Function(_)
                | ResolveFailure::FreeVar(_),
            ) => Vec::new(),
            Ok(resolved) => match resolved.value {
                ResolvedValue::Fields(fields) if dot => field_completions(&fields),
                _ => Vec::new(),
            },
        }
    }
}

// === Helpers ===

/// Like [`find_node_at`], but a cursor past the end of the document is
/// moved back to its last position.
fn node_at_position(
    tree: &AnnotatedAst,
    root: NodeId,
    cursor: Location,
) -> Result<NodeId, FindFailure> {
    let range = tree.loc(root);
    let cursor = if range.is_set() && cursor.strictly_after_range(range) {
        range.end
    } else {
        cursor
    };
    find_node_at(tree, root, cursor)
}

/// The node an analyzable failure points at: the last node on the cursor's
/// line, or else the tightest enclosing one.
fn analyzable_hint(failure: &FindFailure) -> Option<NodeId> {
    if !failure.is_analyzable() {
        return None;
    }
    failure.terminal_on_line().or(failure.tightest())
}

/// True when the character just before `cursor` is a `.`.
fn last_char_is_dot(text: &str, cursor: Location) -> bool {
    let Some(index) = cursor.column.checked_sub(2) else {
        return false;
    };
    line_text(text, cursor.line).and_then(|l| l.chars().nth(index)) == Some('.')
}

/// Only whitespace separates the end of the partial tree from the cursor,
/// which sits on a later line.
fn gap_is_blank(text: &str, rest_end: Location, cursor: Location, dot: bool) -> bool {
    if cursor.line <= rest_end.line {
        return false;
    }
    let blank = |s: &str| s.trim().is_empty();
    let line = |n: usize| line_text(text, n).unwrap_or("");

    let first: String = line(rest_end.line)
        .chars()
        .skip(rest_end.column.saturating_sub(1))
        .collect();
    if !blank(&first) {
        return false;
    }
    if !(rest_end.line + 1..cursor.line).all(|n| blank(line(n))) {
        return false;
    }
    let keep = cursor.column.saturating_sub(if dot { 2 } else { 1 });
    let last: String = line(cursor.line).chars().take(keep).collect();
    blank(&last)
}

fn env_completions(env: &Environment) -> Vec<CompletionInfo> {
    env.names()
        .map(|name| CompletionInfo {
            label: name.to_string(),
            kind: CompletionKind::Variable,
            documentation: None,
        })
        .collect()
}

fn field_completions(fields: &Fields) -> Vec<CompletionInfo> {
    fields
        .iter()
        .filter_map(|(name, field)| {
            let f = field.object_field()?;
            if f.id.is_none() || f.expr2.is_none() || f.kind == ObjectFieldKind::Local {
                return None;
            }
            Some(CompletionInfo {
                label: name.to_string(),
                kind: if f.method_sugar {
                    CompletionKind::Method
                } else {
                    CompletionKind::Field
                },
                documentation: f.heading.as_ref().map(|c| c.text.join("\n")),
            })
        })
        .collect()
}

fn render(node: &NodeRef) -> HoverInfo {
    let mut contents = vec![MarkedString::Code(LanguageString {
        language: "jsonnet".to_string(),
        value: node.pretty_print(),
    })];
    if let Some(comment) = heading_comment(node) {
        contents.push(MarkedString::Text(comment));
    }
    HoverInfo { contents }
}

/// The heading comment of the closest field enclosing `node`.
fn heading_comment(node: &NodeRef) -> Option<String> {
    let field = node
        .tree
        .ancestors(node.id)
        .find_map(|id| node.tree.object_field(id))?;
    if field.kind == ObjectFieldKind::FieldStr {
        return None;
    }
    field.heading.as_ref().map(|c| c.text.join("\n"))
}

/// Runs an editor query, collapsing errors and panics into an empty result.
fn guarded<T: Default>(
    query: &str,
    uri: &str,
    cursor: Location,
    f: impl FnOnce() -> Result<T, AnalysisError>,
) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!("{query} at {uri}:{cursor} failed: {e}");
            T::default()
        }
        Err(payload) => {
            error!("{query} at {uri}:{cursor} panicked: {}", panic_message(payload.as_ref()));
            T::default()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
