use crate::location::LocationRange;
use serde::Serialize;
use std::collections::HashMap;

/// Handle of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct NodeId(pub usize);

/// An arena of nodes. Children are owned through ids; parent, environment and
/// root-object links live in a separate annotation table (see `visitor`).
#[derive(Debug, Clone, Default)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub root: NodeId,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: LocationRange,
}

// === Operators ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Mult,
    Div,
    Percent,
    Plus,
    Minus,
    ShiftL,
    ShiftR,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    ManifestEqual,
    ManifestUnequal,
    BitwiseAnd,
    BitwiseXor,
    BitwiseOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_symbol(s: &str) -> Option<BinaryOp> {
        let op = match s {
            "*" => BinaryOp::Mult,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Percent,
            "+" => BinaryOp::Plus,
            "-" => BinaryOp::Minus,
            "<<" => BinaryOp::ShiftL,
            ">>" => BinaryOp::ShiftR,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterEq,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessEq,
            "==" => BinaryOp::ManifestEqual,
            "!=" => BinaryOp::ManifestUnequal,
            "&" => BinaryOp::BitwiseAnd,
            "^" => BinaryOp::BitwiseXor,
            "|" => BinaryOp::BitwiseOr,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Mult => "*",
            BinaryOp::Div => "/",
            BinaryOp::Percent => "%",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::ShiftL => "<<",
            BinaryOp::ShiftR => ">>",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::ManifestEqual => "==",
            BinaryOp::ManifestUnequal => "!=",
            BinaryOp::BitwiseAnd => "&",
            BinaryOp::BitwiseXor => "^",
            BinaryOp::BitwiseOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    BitwiseNot,
    Plus,
    Minus,
}

impl UnaryOp {
    pub fn from_symbol(s: &str) -> Option<UnaryOp> {
        match s {
            "!" => Some(UnaryOp::Not),
            "~" => Some(UnaryOp::BitwiseNot),
            "+" => Some(UnaryOp::Plus),
            "-" => Some(UnaryOp::Minus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::BitwiseNot => "~",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
        }
    }
}

// === Comments ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommentKind {
    Cpp,
    C,
    Hash,
}

/// A block of comment lines attached to the object or field that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub kind: CommentKind,
    pub text: Vec<String>,
    pub loc: LocationRange,
}

// === Nodes ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiteralStringKind {
    Single,
    Double,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectFieldKind {
    /// `assert expr2 [: expr3]`
    Assert,
    /// `id:[:[:]] expr2`
    FieldId,
    /// `[expr1]:[:[:]] expr2`
    FieldExpr,
    /// `"expr1":[:[:]] expr2`
    FieldStr,
    /// `local id = expr2`
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectFieldHide {
    /// `f:: e`
    Hidden,
    /// `f: e`
    Inherit,
    /// `f::: e`
    Visible,
}

impl ObjectFieldHide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectFieldHide::Hidden => "::",
            ObjectFieldHide::Inherit => ":",
            ObjectFieldHide::Visible => ":::",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub kind: ObjectFieldKind,
    pub hide: ObjectFieldHide,
    /// `+:` sugar.
    pub super_sugar: bool,
    /// `f(x, y):` sugar; `params` holds the parameters.
    pub method_sugar: bool,
    /// The key expression of computed and string fields. Not in scope of the object.
    pub expr1: Option<NodeId>,
    pub id: Option<NodeId>,
    pub params: Vec<NodeId>,
    pub trailing_comma: bool,
    /// The field value, or the asserted condition.
    pub expr2: Option<NodeId>,
    /// The assert message.
    pub expr3: Option<NodeId>,
    pub heading: Option<Comment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Identifier {
        name: String,
    },
    Apply {
        target: NodeId,
        args: Vec<NodeId>,
        trailing_comma: bool,
        tailstrict: bool,
    },
    /// A named argument, `f(x=1)`.
    ApplyParamAssignment {
        id: String,
        right: NodeId,
    },
    /// `e { ... }`
    ApplyBrace {
        left: NodeId,
        right: NodeId,
    },
    Array {
        elements: Vec<NodeId>,
        trailing_comma: bool,
    },
    ArrayComp {
        body: NodeId,
        trailing_comma: bool,
        specs: Vec<NodeId>,
    },
    Assert {
        cond: NodeId,
        message: Option<NodeId>,
        rest: NodeId,
    },
    Binary {
        left: NodeId,
        op: BinaryOp,
        right: NodeId,
    },
    CompSpecFor {
        var_name: NodeId,
        expr: NodeId,
    },
    CompSpecIf {
        expr: NodeId,
    },
    Conditional {
        cond: NodeId,
        branch_true: NodeId,
        branch_false: Option<NodeId>,
    },
    Dollar,
    Error {
        expr: NodeId,
    },
    Function {
        params: Vec<NodeId>,
        trailing_comma: bool,
        body: NodeId,
    },
    FunctionParam {
        id: String,
        default_value: Option<NodeId>,
    },
    Import {
        file: String,
    },
    ImportStr {
        file: String,
    },
    IndexSubscript {
        target: NodeId,
        index: NodeId,
    },
    IndexDot {
        target: NodeId,
        id: NodeId,
    },
    Local {
        binds: Vec<NodeId>,
        body: NodeId,
    },
    LocalBind {
        variable: NodeId,
        body: NodeId,
        function_sugar: bool,
        params: Vec<NodeId>,
        trailing_comma: bool,
    },
    LiteralBoolean {
        value: bool,
    },
    LiteralNull,
    LiteralNumber {
        value: f64,
        original: String,
    },
    LiteralString {
        value: String,
        kind: LiteralStringKind,
        block_indent: String,
    },
    Object {
        fields: Vec<NodeId>,
        trailing_comma: bool,
        heading: Option<Comment>,
    },
    ObjectComp {
        fields: Vec<NodeId>,
        trailing_comma: bool,
        specs: Vec<NodeId>,
    },
    ObjectField(ObjectField),
    SelfObject,
    SuperIndex {
        index: Option<NodeId>,
        id: Option<NodeId>,
    },
    Unary {
        op: UnaryOp,
        expr: NodeId,
    },
    Var {
        id: NodeId,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Identifier { .. } => "Identifier",
            NodeKind::Apply { .. } => "Apply",
            NodeKind::ApplyParamAssignment { .. } => "ApplyParamAssignment",
            NodeKind::ApplyBrace { .. } => "ApplyBrace",
            NodeKind::Array { .. } => "Array",
            NodeKind::ArrayComp { .. } => "ArrayComp",
            NodeKind::Assert { .. } => "Assert",
            NodeKind::Binary { .. } => "Binary",
            NodeKind::CompSpecFor { .. } => "CompSpecFor",
            NodeKind::CompSpecIf { .. } => "CompSpecIf",
            NodeKind::Conditional { .. } => "Conditional",
            NodeKind::Dollar => "Dollar",
            NodeKind::Error { .. } => "Error",
            NodeKind::Function { .. } => "Function",
            NodeKind::FunctionParam { .. } => "FunctionParam",
            NodeKind::Import { .. } => "Import",
            NodeKind::ImportStr { .. } => "ImportStr",
            NodeKind::IndexSubscript { .. } => "IndexSubscript",
            NodeKind::IndexDot { .. } => "IndexDot",
            NodeKind::Local { .. } => "Local",
            NodeKind::LocalBind { .. } => "LocalBind",
            NodeKind::LiteralBoolean { .. } => "LiteralBoolean",
            NodeKind::LiteralNull => "LiteralNull",
            NodeKind::LiteralNumber { .. } => "LiteralNumber",
            NodeKind::LiteralString { .. } => "LiteralString",
            NodeKind::Object { .. } => "Object",
            NodeKind::ObjectComp { .. } => "ObjectComp",
            NodeKind::ObjectField(_) => "ObjectField",
            NodeKind::SelfObject => "Self",
            NodeKind::SuperIndex { .. } => "SuperIndex",
            NodeKind::Unary { .. } => "Unary",
            NodeKind::Var { .. } => "Var",
        }
    }

    /// Child ids in traversal order.
    pub fn children(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        match self {
            NodeKind::Identifier { .. }
            | NodeKind::Dollar
            | NodeKind::Import { .. }
            | NodeKind::ImportStr { .. }
            | NodeKind::LiteralBoolean { .. }
            | NodeKind::LiteralNull
            | NodeKind::LiteralNumber { .. }
            | NodeKind::LiteralString { .. }
            | NodeKind::SelfObject => {}
            NodeKind::Apply { target, args, .. } => {
                out.push(*target);
                out.extend(args);
            }
            NodeKind::ApplyParamAssignment { right, .. } => out.push(*right),
            NodeKind::ApplyBrace { left, right } => out.extend([*left, *right]),
            NodeKind::Array { elements, .. } => out.extend(elements),
            NodeKind::ArrayComp { body, specs, .. } => {
                out.extend(specs);
                out.push(*body);
            }
            NodeKind::Assert {
                cond,
                message,
                rest,
            } => {
                out.push(*cond);
                out.extend(message);
                out.push(*rest);
            }
            NodeKind::Binary { left, right, .. } => out.extend([*left, *right]),
            NodeKind::CompSpecFor { var_name, expr } => out.extend([*var_name, *expr]),
            NodeKind::CompSpecIf { expr } => out.push(*expr),
            NodeKind::Conditional {
                cond,
                branch_true,
                branch_false,
            } => {
                out.extend([*cond, *branch_true]);
                out.extend(branch_false);
            }
            NodeKind::Error { expr } => out.push(*expr),
            NodeKind::Function { params, body, .. } => {
                out.extend(params);
                out.push(*body);
            }
            NodeKind::FunctionParam { default_value, .. } => out.extend(default_value),
            NodeKind::IndexSubscript { target, index } => out.extend([*target, *index]),
            NodeKind::IndexDot { target, id } => out.extend([*target, *id]),
            NodeKind::Local { binds, body } => {
                out.extend(binds);
                out.push(*body);
            }
            NodeKind::LocalBind {
                variable,
                body,
                params,
                ..
            } => {
                out.push(*variable);
                out.extend(params);
                out.push(*body);
            }
            NodeKind::Object { fields, .. } => out.extend(fields),
            NodeKind::ObjectComp { fields, specs, .. } => {
                out.extend(specs);
                out.extend(fields);
            }
            NodeKind::ObjectField(field) => {
                out.extend(field.id);
                out.extend(field.expr1);
                out.extend(&field.params);
                out.extend(field.expr2);
                out.extend(field.expr3);
            }
            NodeKind::SuperIndex { index, id } => {
                out.extend(index);
                out.extend(id);
            }
            NodeKind::Unary { expr, .. } => out.push(*expr),
            NodeKind::Var { id } => out.push(*id),
        }
        out
    }

    /// Returns a copy of this kind with every child id passed through `f`.
    pub fn map_ids(&self, f: &mut impl FnMut(NodeId) -> NodeId) -> NodeKind {
        let mut all = |ids: &[NodeId]| ids.iter().map(|id| f(*id)).collect::<Vec<_>>();
        let mut kind = self.clone();
        // Each arm rewrites only ids; everything else was cloned above.
        match &mut kind {
            NodeKind::Apply { target, args, .. } => {
                let mapped = all(&[*target]);
                *target = mapped[0];
                *args = all(args);
            }
            NodeKind::ApplyParamAssignment { right, .. } => *right = all(&[*right])[0],
            NodeKind::ApplyBrace { left, right } => {
                let mapped = all(&[*left, *right]);
                *left = mapped[0];
                *right = mapped[1];
            }
            NodeKind::Array { elements, .. } => *elements = all(elements),
            NodeKind::ArrayComp { body, specs, .. } => {
                *specs = all(specs);
                *body = all(&[*body])[0];
            }
            NodeKind::Assert {
                cond,
                message,
                rest,
            } => {
                *cond = all(&[*cond])[0];
                *message = message.map(|m| all(&[m])[0]);
                *rest = all(&[*rest])[0];
            }
            NodeKind::Binary { left, right, .. } => {
                let mapped = all(&[*left, *right]);
                *left = mapped[0];
                *right = mapped[1];
            }
            NodeKind::CompSpecFor { var_name, expr } => {
                let mapped = all(&[*var_name, *expr]);
                *var_name = mapped[0];
                *expr = mapped[1];
            }
            NodeKind::CompSpecIf { expr } | NodeKind::Error { expr } | NodeKind::Unary { expr, .. } => {
                *expr = all(&[*expr])[0]
            }
            NodeKind::Conditional {
                cond,
                branch_true,
                branch_false,
            } => {
                let mapped = all(&[*cond, *branch_true]);
                *cond = mapped[0];
                *branch_true = mapped[1];
                *branch_false = branch_false.map(|b| all(&[b])[0]);
            }
            NodeKind::Function { params, body, .. } => {
                *params = all(params);
                *body = all(&[*body])[0];
            }
            NodeKind::FunctionParam { default_value, .. } => {
                *default_value = default_value.map(|d| all(&[d])[0]);
            }
            NodeKind::IndexSubscript { target, index } => {
                let mapped = all(&[*target, *index]);
                *target = mapped[0];
                *index = mapped[1];
            }
            NodeKind::IndexDot { target, id } => {
                let mapped = all(&[*target, *id]);
                *target = mapped[0];
                *id = mapped[1];
            }
            NodeKind::Local { binds, body } => {
                *binds = all(binds);
                *body = all(&[*body])[0];
            }
            NodeKind::LocalBind {
                variable,
                body,
                params,
                ..
            } => {
                *variable = all(&[*variable])[0];
                *params = all(params);
                *body = all(&[*body])[0];
            }
            NodeKind::Object { fields, .. } => *fields = all(fields),
            NodeKind::ObjectComp { fields, specs, .. } => {
                *specs = all(specs);
                *fields = all(fields);
            }
            NodeKind::ObjectField(field) => {
                field.id = field.id.map(|id| all(&[id])[0]);
                field.expr1 = field.expr1.map(|e| all(&[e])[0]);
                field.params = all(&field.params);
                field.expr2 = field.expr2.map(|e| all(&[e])[0]);
                field.expr3 = field.expr3.map(|e| all(&[e])[0]);
            }
            NodeKind::SuperIndex { index, id } => {
                *index = index.map(|i| all(&[i])[0]);
                *id = id.map(|i| all(&[i])[0]);
            }
            NodeKind::Var { id } => *id = all(&[*id])[0],
            NodeKind::Identifier { .. }
            | NodeKind::Dollar
            | NodeKind::Import { .. }
            | NodeKind::ImportStr { .. }
            | NodeKind::LiteralBoolean { .. }
            | NodeKind::LiteralNull
            | NodeKind::LiteralNumber { .. }
            | NodeKind::LiteralString { .. }
            | NodeKind::SelfObject => {}
        }
        kind
    }
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn push(&mut self, kind: NodeKind, loc: LocationRange) -> NodeId {
        self.nodes.push(Node { kind, loc });
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn loc(&self, id: NodeId) -> &LocationRange {
        &self.nodes[id.0].loc
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    /// The same arena, rooted at `root`.
    pub fn with_root(&self, root: NodeId) -> Ast {
        Ast {
            nodes: self.nodes.clone(),
            root,
        }
    }

    /// Ids of the subtree rooted at `root`, in pre-order.
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).into_iter().rev());
        }
        out
    }

    /// Copies the subtree of `other` rooted at `other_root` into a clone of
    /// this arena. Returns the new arena and the id of the copied root.
    pub fn graft(&self, other: &Ast, other_root: NodeId) -> (Ast, NodeId) {
        let mut out = self.clone();
        let order = other.subtree(other_root);
        let base = out.nodes.len();
        let mapping: HashMap<NodeId, NodeId> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, NodeId(base + i)))
            .collect();
        for id in &order {
            let node = other.node(*id);
            let kind = node
                .kind
                .map_ids(&mut |child| mapping.get(&child).copied().unwrap_or(child));
            out.nodes.push(Node {
                kind,
                loc: node.loc.clone(),
            });
        }
        let new_root = mapping.get(&other_root).copied().unwrap_or(other_root);
        (out, new_root)
    }

    pub fn identifier_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Identifier { name } => Some(name),
            _ => None,
        }
    }

    pub fn object_field(&self, id: NodeId) -> Option<&ObjectField> {
        match self.kind(id) {
            NodeKind::ObjectField(field) => Some(field),
            _ => None,
        }
    }

    /// The name of an object field, when it has a plain identifier key.
    pub fn field_name(&self, field: NodeId) -> Option<&str> {
        self.object_field(field)
            .and_then(|f| f.id)
            .and_then(|id| self.identifier_name(id))
    }

    /// Literals and object literals: the nodes resolution stops at.
    pub fn is_value_type(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            NodeKind::LiteralBoolean { .. }
                | NodeKind::LiteralNull
                | NodeKind::LiteralNumber { .. }
                | NodeKind::LiteralString { .. }
                | NodeKind::Object { .. }
        )
    }

    /// Indexes `fields` by name, in insertion order. A later field with the
    /// same name replaces the earlier entry in place. Fields without an
    /// identifier key are skipped; local fields are kept.
    pub fn index_fields(&self, fields: &[NodeId]) -> Vec<(String, NodeId)> {
        let mut out: Vec<(String, NodeId)> = Vec::new();
        for field in fields {
            let Some(name) = self.field_name(*field) else {
                continue;
            };
            match out.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = *field,
                None => out.push((name.to_string(), *field)),
            }
        }
        out
    }

    fn param_names(&self, params: &[NodeId]) -> String {
        params
            .iter()
            .map(|p| match self.kind(*p) {
                NodeKind::FunctionParam { id, .. } => id.clone(),
                _ => self.pretty_print(*p),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn pretty_list(&self, ids: &[NodeId], sep: &str) -> String {
        ids.iter()
            .map(|id| self.pretty_print(*id))
            .collect::<Vec<_>>()
            .join(sep)
    }

    fn pretty_field(&self, field: &ObjectField) -> String {
        let opt = |id: Option<NodeId>| id.map(|i| self.pretty_print(i)).unwrap_or_default();
        let hide = field.hide.as_str();
        match field.kind {
            ObjectFieldKind::Assert => match field.expr3 {
                Some(msg) => format!("assert {} : {}", opt(field.expr2), self.pretty_print(msg)),
                None => format!("assert {}", opt(field.expr2)),
            },
            ObjectFieldKind::FieldId if field.method_sugar => format!(
                "(method) {}({}){hide}",
                opt(field.id),
                self.param_names(&field.params)
            ),
            ObjectFieldKind::FieldId => format!("(field) {}{hide}", opt(field.id)),
            ObjectFieldKind::FieldExpr => format!("(field) [{}]{hide}", opt(field.expr1)),
            ObjectFieldKind::FieldStr => format!("(field) {}{hide}", opt(field.expr1)),
            ObjectFieldKind::Local if field.method_sugar => format!(
                "(method) local {}({})",
                opt(field.id),
                self.param_names(&field.params)
            ),
            ObjectFieldKind::Local => format!("(field) local {}", opt(field.id)),
        }
    }

    /// Renders a node the way hover text shows it.
    pub fn pretty_print(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Identifier { name } => name.clone(),
            NodeKind::Apply {
                target,
                args,
                tailstrict,
                ..
            } => {
                let tailstrict = if *tailstrict { " tailstrict" } else { "" };
                format!(
                    "{}({}{tailstrict})",
                    self.pretty_print(*target),
                    self.pretty_list(args, ", ")
                )
            }
            NodeKind::ApplyParamAssignment { id, right } => {
                format!("{id}={}", self.pretty_print(*right))
            }
            NodeKind::ApplyBrace { left, right } => {
                format!("{} {}", self.pretty_print(*left), self.pretty_print(*right))
            }
            NodeKind::Array { elements, .. } => format!("[{}]", self.pretty_list(elements, ", ")),
            NodeKind::ArrayComp { body, specs, .. } => format!(
                "[{} {}]",
                self.pretty_list(specs, ", "),
                self.pretty_print(*body)
            ),
            NodeKind::Assert { cond, .. } => format!("assert {}", self.pretty_print(*cond)),
            NodeKind::Binary { left, op, right } => format!(
                "{} {} {}",
                self.pretty_print(*left),
                op.as_str(),
                self.pretty_print(*right)
            ),
            NodeKind::CompSpecFor { var_name, expr } => format!(
                "for {} in {}",
                self.pretty_print(*var_name),
                self.pretty_print(*expr)
            ),
            NodeKind::CompSpecIf { expr } => format!("if {}", self.pretty_print(*expr)),
            NodeKind::Conditional {
                cond,
                branch_true,
                branch_false,
            } => {
                let head = format!(
                    "if {} then {}",
                    self.pretty_print(*cond),
                    self.pretty_print(*branch_true)
                );
                match branch_false {
                    Some(f) => format!("{head} else {}", self.pretty_print(*f)),
                    None => head,
                }
            }
            NodeKind::Dollar => "$".to_string(),
            NodeKind::Error { expr } => format!("error {}", self.pretty_print(*expr)),
            NodeKind::Function { params, body, .. } => format!(
                "function ({}) {}",
                self.pretty_list(params, ", "),
                self.pretty_print(*body)
            ),
            NodeKind::FunctionParam { id, default_value } => match default_value {
                Some(d) => format!("(parameter) {id}={}", self.pretty_print(*d)),
                None => format!("(parameter) {id}"),
            },
            NodeKind::Import { file } => format!("import \"{file}\""),
            NodeKind::ImportStr { file } => format!("importstr \"{file}\""),
            NodeKind::IndexSubscript { target, index } => {
                format!("{}[{}]", self.pretty_print(*target), self.pretty_print(*index))
            }
            NodeKind::IndexDot { target, id } => {
                format!("{}.{}", self.pretty_print(*target), self.pretty_print(*id))
            }
            NodeKind::Local { binds, .. } => format!("local {}", self.pretty_list(binds, ",\n  ")),
            NodeKind::LocalBind {
                variable,
                body,
                function_sugar,
                params,
                ..
            } => {
                let name = self.pretty_print(*variable);
                if *function_sugar {
                    format!("{name}({})", self.param_names(params))
                } else {
                    format!("{name} = {}", self.pretty_print(*body))
                }
            }
            NodeKind::LiteralBoolean { value } => value.to_string(),
            NodeKind::LiteralNull => "null".to_string(),
            NodeKind::LiteralNumber { original, .. } => original.clone(),
            NodeKind::LiteralString { value, kind, .. } => match kind {
                LiteralStringKind::Single => format!("'{value}'"),
                LiteralStringKind::Double => format!("\"{value}\""),
                LiteralStringKind::Block => format!("|||{value}|||"),
            },
            NodeKind::Object { fields, .. } => {
                let shown: Vec<String> = fields
                    .iter()
                    .filter_map(|f| match self.object_field(*f) {
                        Some(field) if field.kind == ObjectFieldKind::FieldId => {
                            Some(format!("  {}", self.pretty_field(field)))
                        }
                        _ => None,
                    })
                    .collect();
                format!("(module) {{\n{}\n}}", shown.join(",\n"))
            }
            NodeKind::ObjectComp { .. } => "[OBJECT COMP]".to_string(),
            NodeKind::ObjectField(field) => self.pretty_field(field),
            NodeKind::SelfObject => "self".to_string(),
            NodeKind::SuperIndex { index, id } => match (id, index) {
                (Some(id), _) => format!("super.{}", self.pretty_print(*id)),
                (None, Some(index)) => format!("super[{}]", self.pretty_print(*index)),
                (None, None) => "super".to_string(),
            },
            NodeKind::Unary { op, expr } => format!("{}{}", op.as_str(), self.pretty_print(*expr)),
            NodeKind::Var { id } => self.pretty_print(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Location, LocationRange};

    fn loc() -> LocationRange {
        LocationRange::new("", Location::new(1, 1), Location::new(1, 2))
    }

    fn ident(ast: &mut Ast, name: &str) -> NodeId {
        ast.push(
            NodeKind::Identifier {
                name: name.to_string(),
            },
            loc(),
        )
    }

    fn field(ast: &mut Ast, name: &str, value: NodeId, kind: ObjectFieldKind) -> NodeId {
        let id = ident(ast, name);
        ast.push(
            NodeKind::ObjectField(ObjectField {
                kind,
                hide: ObjectFieldHide::Inherit,
                super_sugar: false,
                method_sugar: false,
                expr1: None,
                id: Some(id),
                params: vec![],
                trailing_comma: false,
                expr2: Some(value),
                expr3: None,
                heading: None,
            }),
            loc(),
        )
    }

    fn number(ast: &mut Ast, n: &str) -> NodeId {
        ast.push(
            NodeKind::LiteralNumber {
                value: n.parse().unwrap(),
                original: n.to_string(),
            },
            loc(),
        )
    }

    #[test]
    fn index_fields_replaces_in_place() {
        let mut ast = Ast::new();
        let one = number(&mut ast, "1");
        let two = number(&mut ast, "2");
        let a = field(&mut ast, "a", one, ObjectFieldKind::FieldId);
        let b = field(&mut ast, "b", one, ObjectFieldKind::Local);
        let a2 = field(&mut ast, "a", two, ObjectFieldKind::FieldId);
        let indexed = ast.index_fields(&[a, b, a2]);
        let names: Vec<&str> = indexed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(indexed[0].1, a2);
    }

    #[test]
    fn pretty_prints_objects_as_modules() {
        let mut ast = Ast::new();
        let one = number(&mut ast, "1");
        let a = field(&mut ast, "a", one, ObjectFieldKind::FieldId);
        let hidden = field(&mut ast, "h", one, ObjectFieldKind::Local);
        let obj = ast.push(
            NodeKind::Object {
                fields: vec![a, hidden],
                trailing_comma: false,
                heading: None,
            },
            loc(),
        );
        assert_eq!(ast.pretty_print(obj), "(module) {\n  (field) a:\n}");
        assert_eq!(ast.pretty_print(hidden), "(field) local h");
    }

    #[test]
    fn pretty_prints_expressions() {
        let mut ast = Ast::new();
        let one = number(&mut ast, "1");
        let two = number(&mut ast, "2");
        let sum = ast.push(
            NodeKind::Binary {
                left: one,
                op: BinaryOp::Plus,
                right: two,
            },
            loc(),
        );
        let neg = ast.push(
            NodeKind::Unary {
                op: UnaryOp::Minus,
                expr: sum,
            },
            loc(),
        );
        assert_eq!(ast.pretty_print(neg), "-1 + 2");
        let param = ast.push(
            NodeKind::FunctionParam {
                id: "x".into(),
                default_value: Some(one),
            },
            loc(),
        );
        assert_eq!(ast.pretty_print(param), "(parameter) x=1");
    }

    #[test]
    fn graft_copies_subtree_with_new_ids() {
        let mut base = Ast::new();
        number(&mut base, "0");

        let mut other = Ast::new();
        let x = ident(&mut other, "x");
        let var = other.push(NodeKind::Var { id: x }, loc());
        let (grafted, root) = base.graft(&other, var);
        assert_eq!(grafted.len(), 3);
        assert_eq!(root, NodeId(2));
        match grafted.kind(root) {
            NodeKind::Var { id } => assert_eq!(grafted.identifier_name(*id), Some("x")),
            other => panic!("expected a Var, got {other:?}"),
        }
    }

    #[test]
    fn operator_tables() {
        assert_eq!(BinaryOp::from_symbol("<<"), Some(BinaryOp::ShiftL));
        assert_eq!(BinaryOp::from_symbol("=>"), None);
        assert_eq!(UnaryOp::from_symbol("~").map(|o| o.as_str()), Some("~"));
    }
}
