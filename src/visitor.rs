use crate::ast::{Ast, NodeId, NodeKind};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

/// What a name in scope refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A `LocalBind` of a `local ...;` expression.
    Local(NodeId),
    /// A `local` field of an object.
    ObjectLocal(NodeId),
    /// A `FunctionParam` of a function, bind or method.
    Param(NodeId),
    /// The `CompSpecFor` introducing a comprehension variable.
    ComprehensionVar(NodeId),
}

impl Binding {
    pub fn node(&self) -> NodeId {
        match self {
            Binding::Local(id)
            | Binding::ObjectLocal(id)
            | Binding::Param(id)
            | Binding::ComprehensionVar(id) => *id,
        }
    }
}

/// The names in scope at a node. Extending an environment copies it, so a
/// node's environment never changes once assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment(Arc<BTreeMap<String, Binding>>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Binding> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Binding)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new environment where `bindings` shadow the names already present.
    pub fn extend(&self, bindings: impl IntoIterator<Item = (String, Binding)>) -> Environment {
        let mut bindings = bindings.into_iter().peekable();
        if bindings.peek().is_none() {
            return self.clone();
        }
        let mut map = (*self.0).clone();
        map.extend(bindings);
        Environment(Arc::new(map))
    }
}

/// Links computed for every node reachable from the root.
#[derive(Debug, Clone, Default)]
pub struct NodeMeta {
    pub parent: Option<NodeId>,
    pub env: Environment,
    /// The outermost object enclosing the node; `$` refers to it.
    pub root_object: Option<NodeId>,
}

/// A parsed tree together with its parent, environment and root-object table.
#[derive(Debug, Clone)]
pub struct AnnotatedAst {
    ast: Ast,
    meta: Vec<NodeMeta>,
}

impl Deref for AnnotatedAst {
    type Target = Ast;

    fn deref(&self) -> &Ast {
        &self.ast
    }
}

impl AnnotatedAst {
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn meta(&self, id: NodeId) -> Option<&NodeMeta> {
        self.meta.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.meta(id).and_then(|m| m.parent)
    }

    pub fn env(&self, id: NodeId) -> Environment {
        self.meta(id).map(|m| m.env.clone()).unwrap_or_default()
    }

    pub fn root_object(&self, id: NodeId) -> Option<NodeId> {
        self.meta(id).and_then(|m| m.root_object)
    }

    /// Walks the parent chain from `id` (inclusive) to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |current| self.parent(*current))
    }

    /// Copies the partial tree `rest` into this arena below `at`. The copy
    /// inherits the environment and root object of `at`, so names visible
    /// there resolve inside it.
    pub fn graft(&self, rest: &Ast, at: NodeId) -> (AnnotatedAst, NodeId) {
        let (ast, root) = self.ast.graft(rest, rest.root);
        let mut meta = self.meta.clone();
        meta.resize(ast.len(), NodeMeta::default());
        let anchor = self.meta(at).cloned().unwrap_or_default();
        annotate_subtree(
            &ast,
            &mut meta,
            root,
            Some(at),
            anchor.env,
            anchor.root_object,
        );
        (AnnotatedAst { ast, meta }, root)
    }
}

/// A pre-order hook over the nodes of an annotated tree.
pub trait Visitor {
    fn previsit(&mut self, tree: &AnnotatedAst, id: NodeId);
}

/// Visits `root` and its descendants in pre-order, parents before children
/// and children in scoping order.
pub fn walk(tree: &AnnotatedAst, root: NodeId, visitor: &mut impl Visitor) {
    for id in tree.subtree(root) {
        visitor.previsit(tree, id);
    }
}

/// Annotates every node reachable from `ast.root`.
pub fn annotate(ast: Ast) -> AnnotatedAst {
    let mut meta = vec![NodeMeta::default(); ast.len()];
    if !ast.is_empty() {
        annotate_subtree(&ast, &mut meta, ast.root, None, Environment::new(), None);
    }
    AnnotatedAst { ast, meta }
}

struct Frame {
    id: NodeId,
    parent: Option<NodeId>,
    env: Environment,
    /// Scope for computed field keys: the scope outside the object.
    key_env: Environment,
    root_object: Option<NodeId>,
}

fn annotate_subtree(
    ast: &Ast,
    meta: &mut [NodeMeta],
    root: NodeId,
    parent: Option<NodeId>,
    env: Environment,
    root_object: Option<NodeId>,
) {
    let mut stack = vec![Frame {
        id: root,
        parent,
        key_env: env.clone(),
        env,
        root_object,
    }];

    while let Some(frame) = stack.pop() {
        let root_object = match ast.kind(frame.id) {
            NodeKind::Object { .. } => frame.root_object.or(Some(frame.id)),
            _ => frame.root_object,
        };
        if let Some(slot) = meta.get_mut(frame.id.0) {
            *slot = NodeMeta {
                parent: frame.parent,
                env: frame.env.clone(),
                root_object,
            };
        }
        for (child, env, key_env) in scoped_children(ast, frame.id, &frame.env, &frame.key_env) {
            stack.push(Frame {
                id: child,
                parent: Some(frame.id),
                env,
                key_env,
                root_object,
            });
        }
    }
}

/// Children of `id`, each with the environment it sees and the environment
/// its computed keys would see.
fn scoped_children(
    ast: &Ast,
    id: NodeId,
    env: &Environment,
    key_env: &Environment,
) -> Vec<(NodeId, Environment, Environment)> {
    let with = |ids: &[NodeId], env: &Environment| -> Vec<(NodeId, Environment, Environment)> {
        ids.iter().map(|c| (*c, env.clone(), env.clone())).collect()
    };

    match ast.kind(id) {
        NodeKind::Local { binds, body } => {
            let inner = env.extend(binds.iter().filter_map(|b| match ast.kind(*b) {
                NodeKind::LocalBind { variable, .. } => ast
                    .identifier_name(*variable)
                    .map(|name| (name.to_string(), Binding::Local(*b))),
                _ => None,
            }));
            let mut out = with(binds, &inner);
            out.extend(with(&[*body], &inner));
            out
        }

        NodeKind::LocalBind {
            variable,
            body,
            params,
            ..
        } => {
            let inner = env.extend(param_bindings(ast, params));
            let mut out = with(&[*variable], env);
            out.extend(with(params, env));
            out.extend(with(&[*body], &inner));
            out
        }

        NodeKind::Function { params, body, .. } => {
            let inner = env.extend(param_bindings(ast, params));
            let mut out = with(params, env);
            out.extend(with(&[*body], &inner));
            out
        }

        NodeKind::Object { fields, .. } => {
            let inner = env.extend(object_locals(ast, fields));
            fields
                .iter()
                .map(|f| (*f, inner.clone(), env.clone()))
                .collect()
        }

        NodeKind::ObjectComp { fields, specs, .. } => {
            let (mut out, spec_env) = scoped_specs(ast, specs, env);
            let inner = spec_env.extend(object_locals(ast, fields));
            out.extend(fields.iter().map(|f| (*f, inner.clone(), spec_env.clone())));
            out
        }

        NodeKind::ArrayComp { body, specs, .. } => {
            let (mut out, spec_env) = scoped_specs(ast, specs, env);
            out.extend(with(&[*body], &spec_env));
            out
        }

        NodeKind::ObjectField(field) => {
            let inner = env.extend(param_bindings(ast, &field.params));
            let mut out = Vec::new();
            out.extend(with(field.expr1.as_slice(), key_env));
            out.extend(with(field.id.as_slice(), env));
            out.extend(with(&field.params, env));
            out.extend(with(field.expr2.as_slice(), &inner));
            out.extend(with(field.expr3.as_slice(), &inner));
            out
        }

        kind => with(&kind.children(), env),
    }
}

/// Each comprehension clause sees the variables bound by the clauses before it.
fn scoped_specs(
    ast: &Ast,
    specs: &[NodeId],
    env: &Environment,
) -> (Vec<(NodeId, Environment, Environment)>, Environment) {
    let mut current = env.clone();
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        out.push((*spec, current.clone(), current.clone()));
        if let NodeKind::CompSpecFor { var_name, .. } = ast.kind(*spec) {
            if let Some(name) = ast.identifier_name(*var_name) {
                current = current.extend([(name.to_string(), Binding::ComprehensionVar(*spec))]);
            }
        }
    }
    (out, current)
}

fn param_bindings(ast: &Ast, params: &[NodeId]) -> Vec<(String, Binding)> {
    params
        .iter()
        .filter_map(|p| match ast.kind(*p) {
            NodeKind::FunctionParam { id, .. } => Some((id.clone(), Binding::Param(*p))),
            _ => None,
        })
        .collect()
}

fn object_locals(ast: &Ast, fields: &[NodeId]) -> Vec<(String, Binding)> {
    fields
        .iter()
        .filter_map(|f| {
            let field = ast.object_field(*f)?;
            if field.kind != crate::ast::ObjectFieldKind::Local {
                return None;
            }
            let name = ast.identifier_name(field.id?)?;
            Some((name.to_string(), Binding::ObjectLocal(*f)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn annotated(source: &str) -> AnnotatedAst {
        let tokens = lex("test.jsonnet", source).unwrap();
        parse(tokens).unwrap()
    }

    /// The first `Var` named `name`, in pre-order.
    fn find_var(tree: &AnnotatedAst, name: &str) -> NodeId {
        tree.subtree(tree.root)
            .into_iter()
            .find(|id| match tree.kind(*id) {
                NodeKind::Var { id } => tree.identifier_name(*id) == Some(name),
                _ => false,
            })
            .unwrap_or_else(|| panic!("no var {name}"))
    }

    #[test]
    fn object_locals_are_visible_to_earlier_fields() {
        let tree = annotated("{ b: c, local c = 5 }");
        let var = find_var(&tree, "c");
        assert!(matches!(tree.env(var).get("c"), Some(Binding::ObjectLocal(_))));
    }

    #[test]
    fn local_binds_see_each_other() {
        let tree = annotated("local a = b, b = 1; a");
        let var = find_var(&tree, "b");
        assert!(matches!(tree.env(var).get("b"), Some(Binding::Local(_))));
        assert!(tree.env(tree.root).is_empty());
    }

    #[test]
    fn params_are_scoped_to_the_body() {
        let tree = annotated("function(x, y=x) x");
        let NodeKind::Function { params, body, .. } = tree.kind(tree.root) else {
            panic!("expected a function");
        };
        let NodeKind::FunctionParam {
            default_value: Some(default),
            ..
        } = tree.kind(params[1])
        else {
            panic!("expected a default");
        };
        assert!(!tree.env(*default).contains("x"));
        assert!(matches!(tree.env(*body).get("x"), Some(Binding::Param(_))));
    }

    #[test]
    fn comprehension_variables_are_bound() {
        let tree = annotated("[y for x in [1] for y in [x]]");
        let x = find_var(&tree, "x");
        assert!(matches!(tree.env(x).get("x"), Some(Binding::ComprehensionVar(_))));
        let y = find_var(&tree, "y");
        assert_eq!(tree.env(y).names().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn computed_keys_use_the_outer_scope() {
        let tree = annotated("local k = 'a'; { [k]: v, local k = 1, local v = 2 }");
        let key = find_var(&tree, "k");
        assert!(matches!(tree.env(key).get("k"), Some(Binding::Local(_))));
        let v = find_var(&tree, "v");
        assert!(matches!(tree.env(v).get("k"), Some(Binding::ObjectLocal(_))));
    }

    #[test]
    fn root_object_is_the_outermost_object() {
        let tree = annotated("local o = { a: { b: $ } }; o");
        let dollar = tree
            .subtree(tree.root)
            .into_iter()
            .find(|id| matches!(tree.kind(*id), NodeKind::Dollar))
            .unwrap();
        let outer = tree.root_object(dollar).unwrap();
        assert!(matches!(tree.kind(outer), NodeKind::Object { .. }));
        assert_eq!(tree.root_object(outer), Some(outer));
        assert_eq!(tree.loc(outer).begin.column, 11);
        assert_eq!(tree.root_object(tree.root), None);
    }

    #[test]
    fn parents_link_back_to_the_root() {
        let tree = annotated("local x = 1; [x]");
        let var = find_var(&tree, "x");
        let chain: Vec<_> = tree.ancestors(var).map(|id| tree.kind(id).name()).collect();
        assert_eq!(chain.first(), Some(&"Var"));
        assert_eq!(chain.last(), Some(&"Local"));
        assert_eq!(tree.parent(tree.root), None);
    }

    #[test]
    fn grafted_trees_inherit_the_anchor_scope() {
        let tree = annotated("local foo = {}; foo");
        let tokens = lex("test.jsonnet", "bar").unwrap();
        let rest = crate::parser::Parser::new(tokens).parse_document().unwrap();
        let (grafted, root) = tree.graft(&rest, tree.root);
        assert_eq!(grafted.parent(root), Some(tree.root));
        assert!(grafted.env(root).contains("foo"));
        assert!(matches!(grafted.kind(root), NodeKind::Var { .. }));
    }
}
