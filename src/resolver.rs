use crate::ast::{BinaryOp, NodeId, NodeKind, ObjectField};
use crate::service::{CachedDocument, CompilerService};
use crate::visitor::{AnnotatedAst, Binding};
use crate::workspace::{DocumentStore, FileSpec};
use log::{debug, error, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// A node together with the tree and file it lives in.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub file_uri: Arc<str>,
    pub tree: Arc<AnnotatedAst>,
    pub id: NodeId,
}

impl NodeRef {
    pub fn new(file_uri: &str, tree: Arc<AnnotatedAst>, id: NodeId) -> Self {
        Self {
            file_uri: Arc::from(file_uri),
            tree,
            id,
        }
    }

    /// Another node of the same tree.
    pub fn with(&self, id: NodeId) -> NodeRef {
        NodeRef {
            file_uri: self.file_uri.clone(),
            tree: self.tree.clone(),
            id,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        self.tree.kind(self.id)
    }

    pub fn object_field(&self) -> Option<&ObjectField> {
        self.tree.object_field(self.id)
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.tree.parent(self.id).map(|p| self.with(p))
    }

    pub fn pretty_print(&self) -> String {
        self.tree.pretty_print(self.id)
    }

    /// Identity across re-parses: an unversioned document gets a fresh
    /// tree on every load, but the same text yields the same ids.
    fn key(&self) -> (Arc<str>, NodeId) {
        (self.file_uri.clone(), self.id)
    }
}

/// Object fields by name, in insertion order. Entries may come from
/// different files after a mixin merge.
#[derive(Debug, Clone, Default)]
pub struct Fields(Vec<(String, NodeRef)>);

impl Fields {
    /// Indexes the fields of an `Object` node.
    pub fn of_object(object: &NodeRef) -> Fields {
        let NodeKind::Object { fields, .. } = object.kind() else {
            return Fields::default();
        };
        Fields(
            object
                .tree
                .index_fields(fields)
                .into_iter()
                .map(|(name, id)| (name, object.with(id)))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&NodeRef> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeRef)> {
        self.0.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn first(&self) -> Option<&NodeRef> {
        self.0.first().map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Right-biased merge: fields of `right` replace same-named fields of
    /// `self` in place; new names are appended. `+:` is not combined.
    pub fn merge(mut self, right: Fields) -> Fields {
        for (name, field) in right.0 {
            match self.0.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = field,
                None => self.0.push((name, field)),
            }
        }
        self
    }
}

#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Node(NodeRef),
    Fields(Fields),
}

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct Resolve {
    pub file_uri: Arc<str>,
    pub value: ResolvedValue,
}

impl Resolve {
    fn node(node: NodeRef) -> Self {
        Resolve {
            file_uri: node.file_uri.clone(),
            value: ResolvedValue::Node(node),
        }
    }

    fn fields(file_uri: Arc<str>, fields: Fields) -> Self {
        Resolve {
            file_uri,
            value: ResolvedValue::Fields(fields),
        }
    }
}

/// Why resolution stopped short of a value.
#[derive(Debug, Clone)]
pub enum ResolveFailure {
    Unresolved,
    /// A function, function-sugar bind or method; it would have to be applied.
    Function(NodeRef),
    /// A parameter or comprehension variable; its value depends on a call.
    FreeVar(NodeRef),
    /// The target of this index expression did not resolve to fields.
    IndexTarget(NodeRef),
    /// The target resolved to `fields`, none of which is the indexed name.
    IndexId { index: NodeRef, fields: Fields },
}

pub type ResolveResult = Result<Resolve, ResolveFailure>;

fn is_resolvable(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Identifier { .. }
            | NodeKind::Var { .. }
            | NodeKind::IndexDot { .. }
            | NodeKind::IndexSubscript { .. }
            | NodeKind::SelfObject
            | NodeKind::Dollar
            | NodeKind::Import { .. }
    )
}

fn is_fields_resolvable(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Object { .. } | NodeKind::Binary { .. })
}

/// Everything resolution needs beyond the tree: where to load imported
/// files from, and where to cache their parses.
pub struct ResolutionContext<'a> {
    store: &'a dyn DocumentStore,
    service: &'a mut dyn CompilerService,
    resolving: Vec<(Arc<str>, NodeId)>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(store: &'a dyn DocumentStore, service: &'a mut dyn CompilerService) -> Self {
        Self {
            store,
            service,
            resolving: Vec::new(),
        }
    }

    /// Resolves a node that names something: identifiers, variables,
    /// indexes, `self`, `$` and imports.
    pub fn resolve(&mut self, node: &NodeRef) -> ResolveResult {
        self.guarded(node, |ctx| match node.kind() {
            NodeKind::Identifier { .. } => match node.parent() {
                Some(parent) => ctx.try_resolve(&parent),
                None => Err(ResolveFailure::Unresolved),
            },
            NodeKind::Var { id } => ctx.resolve_var(node, *id),
            NodeKind::IndexDot { target, id } => {
                let name = node.tree.identifier_name(*id).map(str::to_string);
                ctx.resolve_index(node, *target, name)
            }
            NodeKind::IndexSubscript { target, index } => {
                let name = match node.tree.kind(*index) {
                    NodeKind::LiteralString { value, .. } => Some(value.clone()),
                    _ => None,
                };
                ctx.resolve_index(node, *target, name)
            }
            NodeKind::SelfObject => {
                let object = node
                    .tree
                    .ancestors(node.id)
                    .skip(1)
                    .find(|id| matches!(node.tree.kind(*id), NodeKind::Object { .. }));
                match object {
                    Some(object) => ctx.resolve_fields(&node.with(object)),
                    None => Err(ResolveFailure::Unresolved),
                }
            }
            NodeKind::Dollar => match node.tree.root_object(node.id) {
                Some(root) => ctx.resolve_fields(&node.with(root)),
                None => Err(ResolveFailure::Unresolved),
            },
            NodeKind::Import { file } => ctx.resolve_import(node, file),
            _ => Err(ResolveFailure::Unresolved),
        })
    }

    /// Resolves an object literal, or a `+` of two, to its fields.
    pub fn resolve_fields(&mut self, node: &NodeRef) -> ResolveResult {
        self.guarded(node, |ctx| match node.kind() {
            NodeKind::Object { .. } => Ok(Resolve::fields(
                node.file_uri.clone(),
                Fields::of_object(node),
            )),
            NodeKind::Binary {
                left,
                op: BinaryOp::Plus,
                right,
            } => {
                let left = ctx.try_resolve_indirections(&node.with(*left));
                let right = ctx.try_resolve_indirections(&node.with(*right));
                match (left, right) {
                    (
                        Ok(Resolve {
                            value: ResolvedValue::Fields(left),
                            ..
                        }),
                        Ok(Resolve {
                            value: ResolvedValue::Fields(right),
                            ..
                        }),
                    ) => Ok(Resolve::fields(node.file_uri.clone(), left.merge(right))),
                    _ => Err(ResolveFailure::Unresolved),
                }
            }
            _ => Err(ResolveFailure::Unresolved),
        })
    }

    /// Guesses the result of a call: a method whose body is `self + ...`
    /// returns (at least) the fields of `self`.
    pub fn resolve_type_guess(&mut self, node: &NodeRef) -> ResolveResult {
        let NodeKind::Apply { target, .. } = node.kind() else {
            return Err(ResolveFailure::Unresolved);
        };
        let method = match self.try_resolve(&node.with(*target)) {
            Err(ResolveFailure::Function(method)) => method,
            _ => return Err(ResolveFailure::Unresolved),
        };
        let Some(body) = method.object_field().and_then(|f| f.expr2) else {
            return Err(ResolveFailure::Unresolved);
        };
        match method.tree.kind(body) {
            NodeKind::Binary {
                left,
                op: BinaryOp::Plus,
                ..
            } if matches!(method.tree.kind(*left), NodeKind::SelfObject) => {
                self.resolve(&method.with(*left))
            }
            _ => Err(ResolveFailure::Unresolved),
        }
    }

    /// One step: functions stop, names resolve, objects and mixins become
    /// fields, literals are returned as they are.
    pub fn try_resolve(&mut self, node: &NodeRef) -> ResolveResult {
        let kind = node.kind();
        if matches!(kind, NodeKind::Function { .. }) {
            Err(ResolveFailure::Function(node.clone()))
        } else if is_resolvable(kind) {
            self.resolve(node)
        } else if is_fields_resolvable(kind) {
            self.resolve_fields(node)
        } else if node.tree.is_value_type(node.id) {
            Ok(Resolve::node(node.clone()))
        } else {
            Err(ResolveFailure::Unresolved)
        }
    }

    /// Keeps resolving until the result is fields, a value, or a failure.
    pub fn try_resolve_indirections(&mut self, node: &NodeRef) -> ResolveResult {
        let mut seen = HashSet::new();
        let mut current = Resolve::node(node.clone());
        loop {
            let node = match &current.value {
                ResolvedValue::Fields(_) => return Ok(current),
                ResolvedValue::Node(node) => node.clone(),
            };
            if !seen.insert(node.key()) {
                warn!("resolution of {} loops at {}", node.file_uri, node.tree.loc(node.id));
                return Err(ResolveFailure::Unresolved);
            }

            let kind = node.kind();
            current = if matches!(kind, NodeKind::Function { .. }) {
                return Err(ResolveFailure::Function(node.clone()));
            } else if is_resolvable(kind) {
                self.resolve(&node)?
            } else if is_fields_resolvable(kind) {
                self.resolve_fields(&node)?
            } else if matches!(kind, NodeKind::Apply { .. }) {
                self.resolve_type_guess(&node)?
            } else if node.tree.is_value_type(node.id) {
                return Ok(current);
            } else {
                return Err(ResolveFailure::Unresolved);
            };
        }
    }

    fn resolve_var(&mut self, node: &NodeRef, id: NodeId) -> ResolveResult {
        let Some(name) = node.tree.identifier_name(id) else {
            return Err(ResolveFailure::Unresolved);
        };
        let Some(meta) = node.tree.meta(node.id) else {
            error!("{} at {} was never annotated", node.kind().name(), node.tree.loc(node.id));
            return Err(ResolveFailure::Unresolved);
        };
        match meta.env.get(name) {
            None => Err(ResolveFailure::Unresolved),
            Some(Binding::Param(param)) => Err(ResolveFailure::FreeVar(node.with(param))),
            Some(Binding::ComprehensionVar(spec)) => Err(ResolveFailure::FreeVar(node.with(spec))),
            Some(Binding::Local(bind)) => match node.tree.kind(bind) {
                NodeKind::LocalBind {
                    function_sugar: true,
                    ..
                } => Err(ResolveFailure::Function(node.with(bind))),
                NodeKind::LocalBind { body, .. } => self.try_resolve(&node.with(*body)),
                _ => Err(ResolveFailure::Unresolved),
            },
            Some(Binding::ObjectLocal(field_id)) => {
                let field = node.with(field_id);
                match field.object_field() {
                    Some(f) if f.method_sugar => Err(ResolveFailure::Function(field)),
                    Some(ObjectField {
                        expr2: Some(body), ..
                    }) => self.try_resolve(&field.with(*body)),
                    _ => Err(ResolveFailure::Unresolved),
                }
            }
        }
    }

    fn resolve_index(
        &mut self,
        node: &NodeRef,
        target: NodeId,
        name: Option<String>,
    ) -> ResolveResult {
        let Some(name) = name else {
            return Err(ResolveFailure::Unresolved);
        };
        let fields = match self.try_resolve_indirections(&node.with(target)) {
            Ok(Resolve {
                value: ResolvedValue::Fields(fields),
                ..
            }) => fields,
            _ => return Err(ResolveFailure::IndexTarget(node.clone())),
        };

        let Some(field) = fields.get(&name).cloned() else {
            return Err(ResolveFailure::IndexId {
                index: node.clone(),
                fields,
            });
        };
        match field.object_field() {
            Some(f) if f.method_sugar => Err(ResolveFailure::Function(field)),
            Some(ObjectField {
                expr2: Some(body), ..
            }) => Ok(Resolve::node(field.with(*body))),
            _ => Err(ResolveFailure::Unresolved),
        }
    }

    /// Imports are transparent: the imported document's value, with any
    /// leading `local`s stripped, stands in for the import.
    fn resolve_import(&mut self, node: &NodeRef, file: &str) -> ResolveResult {
        let spec = FileSpec::Import {
            path: file.to_string(),
            importer: node.file_uri.to_string(),
        };
        let doc = match self.store.get(&spec) {
            Ok(doc) => doc,
            Err(err) => {
                debug!("cannot resolve import '{file}': {err}");
                return Err(ResolveFailure::Unresolved);
            }
        };

        let CachedDocument::Parsed(parsed) =
            self.service.cache(&doc.resolved_uri, &doc.text, doc.version)
        else {
            debug!("imported document {} does not parse", doc.resolved_uri);
            return Err(ResolveFailure::Unresolved);
        };

        let tree = parsed.tree.clone();
        let mut root = tree.root;
        while let NodeKind::Local { body, .. } = tree.kind(root) {
            root = *body;
        }
        Ok(Resolve::node(NodeRef::new(&doc.resolved_uri, tree, root)))
    }

    /// Runs `f` unless `node` is already being resolved further up the
    /// stack, which means the definitions are cyclic.
    fn guarded(
        &mut self,
        node: &NodeRef,
        f: impl FnOnce(&mut Self) -> ResolveResult,
    ) -> ResolveResult {
        let key = node.key();
        if self.resolving.contains(&key) {
            warn!(
                "cyclic reference while resolving {} at {}",
                node.file_uri,
                node.tree.loc(node.id)
            );
            return Err(ResolveFailure::Unresolved);
        }
        self.resolving.push(key);
        let result = f(self);
        self.resolving.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{compile, DocumentCache};
    use crate::workspace::InMemoryDocumentStore;

    const URI: &str = "file:///main.jsonnet";

    fn tree(source: &str) -> Arc<AnnotatedAst> {
        match compile(URI, source, None) {
            CachedDocument::Parsed(doc) => doc.tree.clone(),
            CachedDocument::Failed(doc) => panic!("{}", doc.failure.error()),
        }
    }

    /// The last node of kind `name` in pre-order.
    fn last_of(tree: &Arc<AnnotatedAst>, name: &str) -> NodeRef {
        let id = tree
            .subtree(tree.root)
            .into_iter()
            .filter(|id| tree.kind(*id).name() == name)
            .last()
            .unwrap_or_else(|| panic!("no {name} node"));
        NodeRef::new(URI, tree.clone(), id)
    }

    fn with_ctx<T>(f: impl FnOnce(&mut ResolutionContext) -> T) -> T {
        let store = InMemoryDocumentStore::new();
        let mut cache = DocumentCache::new();
        let mut ctx = ResolutionContext::new(&store, &mut cache);
        f(&mut ctx)
    }

    fn field_names(result: ResolveResult) -> Vec<String> {
        match result {
            Ok(Resolve {
                value: ResolvedValue::Fields(fields),
                ..
            }) => fields.names().into_iter().map(str::to_string).collect(),
            other => panic!("expected fields, got {other:?}"),
        }
    }

    #[test]
    fn mixin_merge_is_right_biased() {
        let t = tree("{a: 1, b: 2} + {b: 3, c: 4}");
        let root = NodeRef::new(URI, t.clone(), t.root);
        let result = with_ctx(|ctx| ctx.resolve_fields(&root));
        let Ok(Resolve {
            value: ResolvedValue::Fields(fields),
            ..
        }) = result
        else {
            panic!("expected fields");
        };
        assert_eq!(fields.names(), vec!["a", "b", "c"]);
        let b = fields.get("b").unwrap();
        let value = b.object_field().unwrap().expr2.unwrap();
        assert_eq!(t.pretty_print(value), "3");
    }

    #[test]
    fn object_locals_resolve_regardless_of_order() {
        let t = tree("{ b: c, local c = 5 }");
        let var = last_of(&t, "Var");
        let result = with_ctx(|ctx| ctx.try_resolve_indirections(&var));
        let Ok(Resolve {
            value: ResolvedValue::Node(node),
            ..
        }) = result
        else {
            panic!("expected a node");
        };
        assert_eq!(node.pretty_print(), "5");
    }

    #[test]
    fn missing_index_id_carries_the_target_fields() {
        let t = tree("local foo = { x: 1 }; foo.nonexistent");
        let index = NodeRef::new(URI, t.clone(), last_of(&t, "IndexDot").id);
        match with_ctx(|ctx| ctx.resolve(&index)) {
            Err(ResolveFailure::IndexId { fields, .. }) => assert_eq!(fields.names(), vec!["x"]),
            other => panic!("expected an index id failure, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_index_target() {
        let t = tree("local foo = 3; foo.x");
        let index = last_of(&t, "IndexDot");
        assert!(matches!(
            with_ctx(|ctx| ctx.resolve(&index)),
            Err(ResolveFailure::IndexTarget(_))
        ));
    }

    #[test]
    fn params_are_free_variables_and_methods_are_functions() {
        let t = tree("local f(x) = x; { m(y):: y, n: self.m }");
        let x = NodeRef::new(URI, t.clone(), {
            t.subtree(t.root)
                .into_iter()
                .find(|id| matches!(t.kind(*id), NodeKind::Var { .. }))
                .unwrap()
        });
        assert!(matches!(
            with_ctx(|ctx| ctx.resolve(&x)),
            Err(ResolveFailure::FreeVar(_))
        ));
        let m = last_of(&t, "IndexDot");
        assert!(matches!(
            with_ctx(|ctx| ctx.resolve(&m)),
            Err(ResolveFailure::Function(_))
        ));
    }

    #[test]
    fn self_and_dollar_resolve_to_enclosing_objects() {
        let t = tree("{ a: 1, inner: { b: self, c: $ } }");
        let self_node = last_of(&t, "Self");
        assert_eq!(field_names(with_ctx(|ctx| ctx.resolve(&self_node))), vec!["b", "c"]);
        let dollar = last_of(&t, "Dollar");
        assert_eq!(field_names(with_ctx(|ctx| ctx.resolve(&dollar))), vec!["a", "inner"]);
    }

    #[test]
    fn method_returning_self_plus_guesses_self() {
        let t = tree("local o = { a: 1, with(x):: self + { b: x } }; o.with(2)");
        let apply = last_of(&t, "Apply");
        assert_eq!(
            field_names(with_ctx(|ctx| ctx.try_resolve_indirections(&apply))),
            vec!["a", "with"]
        );
    }

    #[test]
    fn cyclic_locals_are_unresolved() {
        let t = tree("local a = b, b = a; a");
        let body = NodeRef::new(URI, t.clone(), last_of(&t, "Var").id);
        assert!(matches!(
            with_ctx(|ctx| ctx.try_resolve_indirections(&body)),
            Err(ResolveFailure::Unresolved)
        ));

        let t = tree("local o = { a: o.a }; o.a");
        let index = last_of(&t, "IndexDot");
        assert!(with_ctx(|ctx| ctx.try_resolve_indirections(&index)).is_err());
    }

    #[test]
    fn imports_are_transparent() {
        let mut store = InMemoryDocumentStore::new();
        let main = store.insert("/p/main.jsonnet", "local lib = import 'lib.libsonnet'; lib.x");
        store.insert("/p/lib.libsonnet", "local helper = 1; { x: helper, y: 2 }");
        let mut cache = DocumentCache::new();

        let doc = store.get(&FileSpec::Uri(main.clone())).unwrap();
        let CachedDocument::Parsed(parsed) = cache.cache(&main, &doc.text, doc.version) else {
            panic!("main should parse");
        };
        let index = parsed
            .tree
            .subtree(parsed.tree.root)
            .into_iter()
            .find(|id| matches!(parsed.tree.kind(*id), NodeKind::IndexDot { .. }))
            .unwrap();
        let index = NodeRef::new(&main, parsed.tree.clone(), index);

        let mut ctx = ResolutionContext::new(&store, &mut cache);
        let resolved = ctx.try_resolve_indirections(&index).unwrap();
        assert_eq!(&*resolved.file_uri, "file:///p/lib.libsonnet");
        let ResolvedValue::Node(node) = resolved.value else {
            panic!("expected a node");
        };
        assert_eq!(node.pretty_print(), "1");
    }

    #[test]
    fn self_import_cycle_is_unresolved() {
        let mut store = InMemoryDocumentStore::new();
        let main = store.insert("/p/loop.jsonnet", "(import 'loop.jsonnet').x");
        let mut cache = DocumentCache::new();
        let doc = store.get(&FileSpec::Uri(main.clone())).unwrap();
        let CachedDocument::Parsed(parsed) = cache.cache(&main, &doc.text, doc.version) else {
            panic!("should parse");
        };
        let root = NodeRef::new(&main, parsed.tree.clone(), parsed.tree.root);
        let mut ctx = ResolutionContext::new(&store, &mut cache);
        assert!(ctx.try_resolve_indirections(&root).is_err());
    }

    fn unversioned_root(store: &InMemoryDocumentStore, cache: &mut DocumentCache, uri: &str) -> NodeRef {
        let doc = store.get(&FileSpec::Uri(uri.to_string())).unwrap();
        let CachedDocument::Parsed(parsed) = cache.cache(uri, &doc.text, doc.version) else {
            panic!("should parse");
        };
        NodeRef::new(uri, parsed.tree.clone(), parsed.tree.root)
    }

    #[test]
    fn unversioned_self_import_terminates() {
        let mut store = InMemoryDocumentStore::new();
        let main = "file:///p/loop.jsonnet";
        store.open(main, "(import 'loop.jsonnet').x", None);
        let mut cache = DocumentCache::new();
        let root = unversioned_root(&store, &mut cache, main);

        let mut ctx = ResolutionContext::new(&store, &mut cache);
        assert!(ctx.try_resolve_indirections(&root).is_err());
        assert!(ctx.resolving.is_empty());
    }

    #[test]
    fn unversioned_mutual_imports_terminate() {
        let mut store = InMemoryDocumentStore::new();
        store.open("file:///p/a.jsonnet", "(import 'b.jsonnet').x", None);
        store.open("file:///p/b.jsonnet", "(import 'a.jsonnet').y", None);
        let mut cache = DocumentCache::new();
        let root = unversioned_root(&store, &mut cache, "file:///p/a.jsonnet");

        let mut ctx = ResolutionContext::new(&store, &mut cache);
        assert!(ctx.try_resolve_indirections(&root).is_err());
        assert!(ctx.resolving.is_empty());
    }
}
