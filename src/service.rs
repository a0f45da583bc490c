use crate::error::StaticError;
use crate::lexer::{self, LexFailure, Token};
use crate::parser;
use crate::visitor::AnnotatedAst;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// A document that lexed and parsed.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub tokens: Vec<Token>,
    pub tree: Arc<AnnotatedAst>,
    pub version: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ParseFailure {
    Lex(LexFailure),
    /// The tokens lexed fine; `error.rest` may hold a partial tree.
    Parse { tokens: Vec<Token>, error: StaticError },
}

impl ParseFailure {
    pub fn error(&self) -> &StaticError {
        match self {
            ParseFailure::Lex(failure) => &failure.error,
            ParseFailure::Parse { error, .. } => error,
        }
    }
}

/// A document that failed to lex or parse.
#[derive(Debug, Clone)]
pub struct FailedParsedDocument {
    pub text: String,
    pub failure: ParseFailure,
    pub version: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum CachedDocument {
    Parsed(Arc<ParsedDocument>),
    Failed(Arc<FailedParsedDocument>),
}

impl CachedDocument {
    pub fn version(&self) -> Option<i64> {
        match self {
            CachedDocument::Parsed(doc) => doc.version,
            CachedDocument::Failed(doc) => doc.version,
        }
    }

    pub fn parsed(&self) -> Option<&Arc<ParsedDocument>> {
        match self {
            CachedDocument::Parsed(doc) => Some(doc),
            CachedDocument::Failed(_) => None,
        }
    }
}

pub trait CompilerService {
    /// Lexes and parses `text`, unless the entry for `uri` already has this
    /// (non-`None`) version.
    fn cache(&mut self, uri: &str, text: &str, version: Option<i64>) -> CachedDocument;

    /// The most recent successful parse of `uri`, if any.
    fn last_success(&self, uri: &str) -> Option<Arc<ParsedDocument>>;

    fn delete(&mut self, uri: &str);
}

/// Lexes and parses one document without caching.
pub fn compile(uri: &str, text: &str, version: Option<i64>) -> CachedDocument {
    let tokens = match lexer::lex(uri, text) {
        Ok(tokens) => tokens,
        Err(failure) => {
            return CachedDocument::Failed(Arc::new(FailedParsedDocument {
                text: text.to_string(),
                failure: ParseFailure::Lex(failure),
                version,
            }))
        }
    };

    match parser::parse(tokens.clone()) {
        Ok(tree) => CachedDocument::Parsed(Arc::new(ParsedDocument {
            text: text.to_string(),
            tokens,
            tree: Arc::new(tree),
            version,
        })),
        Err(error) => CachedDocument::Failed(Arc::new(FailedParsedDocument {
            text: text.to_string(),
            failure: ParseFailure::Parse { tokens, error },
            version,
        })),
    }
}

/// Per-URI parse cache. Owned by one analyzer; entries are replaced whole.
#[derive(Debug, Default)]
pub struct DocumentCache {
    docs: HashMap<String, CachedDocument>,
    last_success: HashMap<String, Arc<ParsedDocument>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl CompilerService for DocumentCache {
    fn cache(&mut self, uri: &str, text: &str, version: Option<i64>) -> CachedDocument {
        if let Some(cached) = self.docs.get(uri) {
            if version.is_some() && cached.version() == version {
                debug!("parse cache hit for {uri} at version {version:?}");
                return cached.clone();
            }
        }

        debug!("parsing {uri} at version {version:?}");
        let compiled = compile(uri, text, version);
        if let CachedDocument::Parsed(doc) = &compiled {
            self.last_success.insert(uri.to_string(), doc.clone());
        }
        self.docs.insert(uri.to_string(), compiled.clone());
        compiled
    }

    fn last_success(&self, uri: &str) -> Option<Arc<ParsedDocument>> {
        self.last_success.get(uri).cloned()
    }

    fn delete(&mut self, uri: &str) {
        self.docs.remove(uri);
        self.last_success.remove(uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "file:///a.jsonnet";

    #[test]
    fn same_version_reuses_the_entry() {
        let mut cache = DocumentCache::new();
        let first = cache.cache(URI, "{ a: 1 }", Some(1));
        let second = cache.cache(URI, "this text is ignored", Some(1));
        let (CachedDocument::Parsed(a), CachedDocument::Parsed(b)) = (first, second) else {
            panic!("expected parsed documents");
        };
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn new_version_reparses() {
        let mut cache = DocumentCache::new();
        cache.cache(URI, "{ a: 1 }", Some(1));
        let updated = cache.cache(URI, "{ b: 2 }", Some(2));
        assert_eq!(updated.parsed().map(|d| d.text.as_str()), Some("{ b: 2 }"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_version_always_reparses() {
        let mut cache = DocumentCache::new();
        let a = cache.cache(URI, "1", None);
        let b = cache.cache(URI, "1", None);
        assert!(!Arc::ptr_eq(a.parsed().unwrap(), b.parsed().unwrap()));
    }

    #[test]
    fn failures_keep_the_last_success() {
        let mut cache = DocumentCache::new();
        cache.cache(URI, "local foo = { a: 1 }; foo", Some(1));
        let failed = cache.cache(URI, "local foo = { a: 1 }; foo.", Some(2));
        let CachedDocument::Failed(doc) = failed else {
            panic!("expected a failure");
        };
        assert!(matches!(doc.failure, ParseFailure::Parse { .. }));
        assert!(doc.failure.error().rest.is_some());
        let last = cache.last_success(URI).unwrap();
        assert_eq!(last.version, Some(1));

        cache.delete(URI);
        assert!(cache.last_success(URI).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn lex_failures_are_reported() {
        let mut cache = DocumentCache::new();
        let failed = cache.cache(URI, "'unterminated", Some(1));
        let CachedDocument::Failed(doc) = failed else {
            panic!("expected a failure");
        };
        assert!(matches!(doc.failure, ParseFailure::Lex(_)));
        assert_eq!(doc.failure.error().msg, "Unterminated String");
    }
}
