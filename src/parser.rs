use crate::ast::*;
use crate::error::StaticError;
use crate::lexer::{Token, TokenKind};
use crate::location::LocationRange;
use crate::visitor::{self, AnnotatedAst};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Function calls and indexing.
const APPLY_PRECEDENCE: u8 = 2;
/// Logical and bitwise negation, unary `+` and `-`.
const UNARY_PRECEDENCE: u8 = 4;
/// `local`, `if`, `import`, `function`, `error`.
const MAX_PRECEDENCE: u8 = 16;

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\n\s*\n").unwrap());
static C_COMMENT_MARGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\*").unwrap());

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Mult | BinaryOp::Div | BinaryOp::Percent => 5,
        BinaryOp::Plus | BinaryOp::Minus => 6,
        BinaryOp::ShiftL | BinaryOp::ShiftR => 7,
        BinaryOp::Greater | BinaryOp::GreaterEq | BinaryOp::Less | BinaryOp::LessEq => 8,
        BinaryOp::ManifestEqual | BinaryOp::ManifestUnequal => 9,
        BinaryOp::BitwiseAnd => 10,
        BinaryOp::BitwiseXor => 11,
        BinaryOp::BitwiseOr => 12,
        BinaryOp::And => 13,
        BinaryOp::Or => 14,
    }
}

fn span(begin: &Token, end: &LocationRange) -> LocationRange {
    LocationRange::new(begin.loc.file_name.clone(), begin.loc.begin, end.end)
}

fn unexpected(tok: &Token, during: &str) -> StaticError {
    StaticError::range(format!("Unexpected: {tok} while {during}"), tok.loc.clone())
}

/// Parses a token stream and stamps every reachable node with its parent,
/// environment and root object.
pub fn parse(tokens: Vec<Token>) -> Result<AnnotatedAst, StaticError> {
    let ast = Parser::new(tokens).parse_document()?;
    Ok(visitor::annotate(ast))
}

/// A precedence-climbing parser for Jsonnet. Nodes are pushed into an arena
/// as they are built; on failure the arena travels with the error so the
/// partial tree stays usable.
#[derive(Debug)]
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    ast: Ast,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::EndOfFile) {
            let loc = tokens
                .last()
                .map(|t| LocationRange::point(t.loc.file_name.clone(), t.loc.end))
                .unwrap_or_default();
            let pos = tokens.last().map(|t| t.pos_end).unwrap_or(0);
            tokens.push(Token {
                kind: TokenKind::EndOfFile,
                fodder: Vec::new(),
                data: String::new(),
                string_block_indent: String::new(),
                string_block_term_indent: String::new(),
                loc,
                pos_start: pos,
                pos_end: pos,
            });
        }
        Self {
            tokens,
            position: 0,
            ast: Ast::new(),
        }
    }

    // === Main Parsing Methods ===

    /// Document ::= Expr [ Comments ] EOF
    pub fn parse_document(mut self) -> Result<Ast, StaticError> {
        let root = self.parse(MAX_PRECEDENCE, None)?;

        let next = self.peek();
        if next.kind != TokenKind::EndOfFile {
            return Err(StaticError::range(
                format!("Did not expect: {next}"),
                next.loc.clone(),
            ));
        }
        self.ast.root = root;
        Ok(self.ast)
    }

    /// Expr ::= "assert" Expr [ ":" Expr ] ";" Expr
    ///        | "error" Expr
    ///        | "if" Expr "then" Expr [ "else" Expr ]
    ///        | "function" "(" [ Params ] ")" Expr
    ///        | ( "import" | "importstr" ) String
    ///        | "local" Bind { "," Bind } ";" Expr
    ///        | UnaryOp Expr
    ///        | Expr BinaryOp Expr
    ///        | Expr ( "." Id | "[" Expr "]" | "(" [ Args ] ")" [ "tailstrict" ] | Object )
    ///        | Terminal
    fn parse(&mut self, prec: u8, heading: Option<Comment>) -> Result<NodeId, StaticError> {
        let heading = self.parse_optional_comments().or(heading);
        let begin = self.peek().clone();

        match begin.kind {
            TokenKind::Assert => {
                self.pop();
                let cond = self.parse(MAX_PRECEDENCE, None)?;
                let message = if self.peek_is_op(":") {
                    self.pop();
                    Some(self.parse(MAX_PRECEDENCE, None)?)
                } else {
                    None
                };
                self.pop_expect(TokenKind::Semicolon)?;
                let rest = self.parse(MAX_PRECEDENCE, None)?;
                let loc = span(&begin, self.ast.loc(rest));
                Ok(self.ast.push(
                    NodeKind::Assert {
                        cond,
                        message,
                        rest,
                    },
                    loc,
                ))
            }

            TokenKind::Error => {
                self.pop();
                let expr = self.parse(MAX_PRECEDENCE, None)?;
                let loc = span(&begin, self.ast.loc(expr));
                Ok(self.ast.push(NodeKind::Error { expr }, loc))
            }

            TokenKind::If => {
                self.pop();
                let cond = self.parse(MAX_PRECEDENCE, None)?;
                self.pop_expect(TokenKind::Then)?;
                let branch_true = self.parse(MAX_PRECEDENCE, None)?;
                let mut branch_false = None;
                let mut loc = span(&begin, self.ast.loc(branch_true));
                if self.peek().kind == TokenKind::Else {
                    self.pop();
                    let expr = self.parse(MAX_PRECEDENCE, None)?;
                    loc = span(&begin, self.ast.loc(expr));
                    branch_false = Some(expr);
                }
                Ok(self.ast.push(
                    NodeKind::Conditional {
                        cond,
                        branch_true,
                        branch_false,
                    },
                    loc,
                ))
            }

            TokenKind::Function => {
                self.pop();
                let next = self.pop();
                if next.kind != TokenKind::ParenL {
                    return Err(StaticError::range(
                        format!("Expected ( but got {next}"),
                        next.loc,
                    ));
                }
                let (_, params, trailing_comma) = self.parse_params_list("function parameter")?;
                let body = self.parse(MAX_PRECEDENCE, None)?;
                let loc = span(&begin, self.ast.loc(body));
                Ok(self.ast.push(
                    NodeKind::Function {
                        params,
                        trailing_comma,
                        body,
                    },
                    loc,
                ))
            }

            TokenKind::Import | TokenKind::ImportStr => {
                self.pop();
                let body = self.parse(MAX_PRECEDENCE, None)?;
                let file = match self.ast.kind(body) {
                    NodeKind::LiteralString { value, .. } => value.clone(),
                    _ => {
                        return Err(StaticError::range(
                            "Computed imports are not allowed",
                            self.ast.loc(body).clone(),
                        ))
                    }
                };
                let loc = span(&begin, self.ast.loc(body));
                let kind = if begin.kind == TokenKind::Import {
                    NodeKind::Import { file }
                } else {
                    NodeKind::ImportStr { file }
                };
                Ok(self.ast.push(kind, loc))
            }

            TokenKind::Local => {
                self.pop();
                let mut binds = Vec::new();
                loop {
                    self.parse_bind(&begin, &mut binds)?;
                    let delim = self.pop();
                    match delim.kind {
                        TokenKind::Semicolon => break,
                        TokenKind::Comma => continue,
                        _ => {
                            let msg = format!("Expected , or ; but got {delim}");
                            return Err(match self.rest_from_binds(&binds) {
                                Some(rest) => {
                                    StaticError::with_rest(msg, delim.loc, self.ast.with_root(rest))
                                }
                                None => StaticError::range(msg, delim.loc),
                            });
                        }
                    }
                }
                let body = self.parse(MAX_PRECEDENCE, None)?;
                let loc = span(&begin, self.ast.loc(body));
                Ok(self.ast.push(NodeKind::Local { binds, body }, loc))
            }

            _ => self.parse_operators(prec, heading, begin),
        }
    }

    /// The precedence ladder: unary operators at `UNARY_PRECEDENCE`, then
    /// left-associative binary operators and application at each level.
    fn parse_operators(
        &mut self,
        prec: u8,
        heading: Option<Comment>,
        begin: Token,
    ) -> Result<NodeId, StaticError> {
        if begin.kind == TokenKind::Operator {
            let Some(op) = UnaryOp::from_symbol(&begin.data) else {
                return Err(StaticError::range(
                    format!("Not a unary operator: {}", begin.data),
                    begin.loc,
                ));
            };
            if prec == UNARY_PRECEDENCE {
                self.pop();
                let expr = self.parse(prec, None)?;
                let loc = span(&begin, self.ast.loc(expr));
                return Ok(self.ast.push(NodeKind::Unary { op, expr }, loc));
            }
        }

        if prec == 0 {
            return self.parse_terminal(heading);
        }

        let mut lhs = self.parse(prec - 1, heading.clone())?;

        loop {
            let next = self.peek();
            let bop = match next.kind {
                TokenKind::Operator => {
                    // `:` and `=` end an expression inside asserts, fields and binds.
                    if next.data == ":" || next.data == "=" {
                        return Ok(lhs);
                    }
                    let Some(bop) = BinaryOp::from_symbol(&next.data) else {
                        return Err(StaticError::range(
                            format!("Not a binary operator: {}", next.data),
                            next.loc.clone(),
                        ));
                    };
                    if binary_precedence(bop) != prec {
                        return Ok(lhs);
                    }
                    Some(bop)
                }
                TokenKind::Dot | TokenKind::BracketL | TokenKind::ParenL | TokenKind::BraceL => {
                    if prec != APPLY_PRECEDENCE {
                        return Ok(lhs);
                    }
                    None
                }
                _ => return Ok(lhs),
            };

            let op = self.pop();
            lhs = match (op.kind, bop) {
                (TokenKind::BracketL, _) => {
                    let index = self.parse(MAX_PRECEDENCE, None)?;
                    let end = self.pop_expect(TokenKind::BracketR)?;
                    let loc = span(&begin, &end.loc);
                    self.ast
                        .push(NodeKind::IndexSubscript { target: lhs, index }, loc)
                }
                (TokenKind::Dot, _) => {
                    let field = match self.pop_expect(TokenKind::Identifier) {
                        Ok(field) => field,
                        // Keep what precedes the `.` so completion can dot into it.
                        Err(err) => {
                            return Err(StaticError::with_rest(
                                err.msg,
                                err.loc,
                                self.ast.with_root(lhs),
                            ))
                        }
                    };
                    let id = self.push_identifier(&field);
                    let loc = span(&begin, &field.loc);
                    self.ast.push(NodeKind::IndexDot { target: lhs, id }, loc)
                }
                (TokenKind::ParenL, _) => {
                    let (end, args, trailing_comma) = self.parse_args_list("function argument")?;
                    let tailstrict = self.peek().kind == TokenKind::TailStrict;
                    if tailstrict {
                        self.pop();
                    }
                    let loc = span(&begin, &end.loc);
                    self.ast.push(
                        NodeKind::Apply {
                            target: lhs,
                            args,
                            trailing_comma,
                            tailstrict,
                        },
                        loc,
                    )
                }
                (TokenKind::BraceL, _) => {
                    let (right, end) = self.parse_object_remainder(&op, heading.clone())?;
                    let loc = span(&begin, &end.loc);
                    self.ast.push(NodeKind::ApplyBrace { left: lhs, right }, loc)
                }
                (_, Some(op)) => {
                    let right = self.parse(prec - 1, None)?;
                    let loc = span(&begin, self.ast.loc(right));
                    self.ast.push(
                        NodeKind::Binary {
                            left: lhs,
                            op,
                            right,
                        },
                        loc,
                    )
                }
                (_, None) => return Err(unexpected(&op, "parsing operator")),
            };
        }
    }

    /// Terminal ::= Literal | String | Number | Id | "self" | "$"
    ///            | "super" ( "." Id | "[" Expr "]" )
    ///            | "(" Expr ")" | Array | Object
    fn parse_terminal(&mut self, heading: Option<Comment>) -> Result<NodeId, StaticError> {
        let tok = self.pop();
        let loc = tok.loc.clone();
        let kind = match tok.kind {
            TokenKind::Assert
            | TokenKind::BraceR
            | TokenKind::BracketR
            | TokenKind::Comma
            | TokenKind::Dot
            | TokenKind::Else
            | TokenKind::Error
            | TokenKind::For
            | TokenKind::Function
            | TokenKind::If
            | TokenKind::In
            | TokenKind::Import
            | TokenKind::ImportStr
            | TokenKind::Local
            | TokenKind::Operator
            | TokenKind::ParenR
            | TokenKind::Semicolon
            | TokenKind::TailStrict
            | TokenKind::Then
            | TokenKind::CommentCpp
            | TokenKind::CommentC
            | TokenKind::CommentHash => return Err(unexpected(&tok, "parsing terminal")),

            TokenKind::EndOfFile => {
                return Err(StaticError::range("Unexpected end of file.", loc));
            }

            TokenKind::BraceL => return Ok(self.parse_object_remainder(&tok, heading)?.0),
            TokenKind::BracketL => return self.parse_array_remainder(&tok),
            TokenKind::ParenL => {
                let inner = self.parse(MAX_PRECEDENCE, None)?;
                self.pop_expect(TokenKind::ParenR)?;
                return Ok(inner);
            }

            // Literals
            TokenKind::Number => match tok.data.parse::<f64>() {
                Ok(value) => NodeKind::LiteralNumber {
                    value,
                    original: tok.data.clone(),
                },
                Err(_) => {
                    return Err(StaticError::range(
                        "Could not parse floating point number.",
                        loc,
                    ))
                }
            },
            TokenKind::StringSingle | TokenKind::StringDouble | TokenKind::StringBlock => {
                Self::string_literal(&tok)
            }
            TokenKind::False => NodeKind::LiteralBoolean { value: false },
            TokenKind::True => NodeKind::LiteralBoolean { value: true },
            TokenKind::Null => NodeKind::LiteralNull,

            // Variables
            TokenKind::Dollar => NodeKind::Dollar,
            TokenKind::Identifier => {
                let id = self.push_identifier(&tok);
                NodeKind::Var { id }
            }
            TokenKind::SelfKw => NodeKind::SelfObject,
            TokenKind::Super => return self.parse_super(&tok),
        };
        Ok(self.ast.push(kind, loc))
    }

    // === EBNF Sub-Rules ===

    /// SuperIndex ::= "super" "." Id | "super" "[" Expr "]"
    fn parse_super(&mut self, tok: &Token) -> Result<NodeId, StaticError> {
        let next = self.pop();
        let (index, id, end) = match next.kind {
            TokenKind::Dot => {
                let field = self.pop_expect(TokenKind::Identifier)?;
                let id = self.push_identifier(&field);
                (None, Some(id), field.loc)
            }
            TokenKind::BracketL => {
                let index = self.parse(MAX_PRECEDENCE, None)?;
                let end = self.pop_expect(TokenKind::BracketR)?;
                (Some(index), None, end.loc)
            }
            _ => {
                return Err(StaticError::range(
                    "Expected . or [ after super.",
                    tok.loc.clone(),
                ))
            }
        };
        Ok(self
            .ast
            .push(NodeKind::SuperIndex { index, id }, span(tok, &end)))
    }

    /// Array ::= "[" "]"
    ///         | "[" Expr { "," Expr } [ "," ] "]"
    ///         | "[" Expr [ "," ] CompSpecs "]"
    fn parse_array_remainder(&mut self, tok: &Token) -> Result<NodeId, StaticError> {
        if self.peek().kind == TokenKind::BracketR {
            let end = self.pop();
            return Ok(self.ast.push(
                NodeKind::Array {
                    elements: Vec::new(),
                    trailing_comma: false,
                },
                span(tok, &end.loc),
            ));
        }

        let first = self.parse(MAX_PRECEDENCE, None)?;
        let mut got_comma = false;
        if self.peek().kind == TokenKind::Comma {
            self.pop();
            got_comma = true;
        }

        if self.peek().kind == TokenKind::For {
            self.pop();
            let (specs, end) = self.parse_comp_specs(TokenKind::BracketR)?;
            return Ok(self.ast.push(
                NodeKind::ArrayComp {
                    body: first,
                    trailing_comma: got_comma,
                    specs,
                },
                span(tok, &end.loc),
            ));
        }

        let mut elements = vec![first];
        let end = loop {
            let next = self.peek();
            if next.kind == TokenKind::BracketR {
                break self.pop();
            }
            if !got_comma {
                return Err(StaticError::range(
                    "Expected a comma before next array element.",
                    next.loc.clone(),
                ));
            }
            elements.push(self.parse(MAX_PRECEDENCE, None)?);
            got_comma = self.peek().kind == TokenKind::Comma;
            if got_comma {
                self.pop();
            }
        };

        Ok(self.ast.push(
            NodeKind::Array {
                elements,
                trailing_comma: got_comma,
            },
            span(tok, &end.loc),
        ))
    }

    /// Object ::= "{" [ Member { "," Member } [ "," ] ] "}"
    ///          | "{" { ObjectLocal "," } "[" Expr "]" ":" Expr { "," ObjectLocal } [ "," ] CompSpecs "}"
    /// Member ::= ObjectLocal | "assert" Expr [ ":" Expr ] | Field
    ///
    /// A comment block before a field, or between the comma and the field,
    /// becomes the field's heading.
    fn parse_object_remainder(
        &mut self,
        tok: &Token,
        heading: Option<Comment>,
    ) -> Result<(NodeId, Token), StaticError> {
        let mut fields: Vec<NodeId> = Vec::new();
        let mut literal_fields: HashSet<String> = HashSet::new();
        let mut binds: HashSet<String> = HashSet::new();
        let mut got_comma = false;
        let mut first = true;

        loop {
            let mut field_heading = self.parse_optional_comments();

            if !got_comma && !first && self.peek().kind == TokenKind::Comma {
                self.pop();
                got_comma = true;
            }
            if self.peek_raw().kind.is_comment() {
                field_heading = self.parse_optional_comments();
            }

            let next = self.pop();
            match next.kind {
                TokenKind::BraceR => {
                    let loc = span(tok, &next.loc);
                    let object = self.ast.push(
                        NodeKind::Object {
                            fields,
                            trailing_comma: got_comma,
                            heading,
                        },
                        loc,
                    );
                    return Ok((object, next));
                }
                TokenKind::For => {
                    return self.parse_object_comp_remainder(tok, &next, got_comma, fields);
                }
                _ => {}
            }

            if !got_comma && !first {
                return Err(StaticError::range(
                    "Expected a comma before next field.",
                    next.loc,
                ));
            }
            first = false;

            let field = match next.kind {
                TokenKind::BracketL
                | TokenKind::Identifier
                | TokenKind::StringDouble
                | TokenKind::StringSingle
                | TokenKind::StringBlock => {
                    self.parse_object_field(field_heading, &next, &mut literal_fields)?
                }
                TokenKind::Local => self.parse_object_local(&next, &mut binds)?,
                TokenKind::Assert => self.parse_object_assert(&next)?,
                _ => return Err(unexpected(&next, "parsing field definition")),
            };
            fields.push(field);
            got_comma = false;
        }
    }

    /// Called right after the `for` of an object comprehension.
    fn parse_object_comp_remainder(
        &mut self,
        first: &Token,
        for_tok: &Token,
        got_comma: bool,
        fields: Vec<NodeId>,
    ) -> Result<(NodeId, Token), StaticError> {
        let mut asserts = 0;
        let mut value_fields = Vec::new();
        for id in &fields {
            match self.ast.object_field(*id).map(|f| f.kind) {
                Some(ObjectFieldKind::Local) => {}
                Some(ObjectFieldKind::Assert) => asserts += 1,
                _ => value_fields.push(*id),
            }
        }

        let fail = |msg: &str| Err(StaticError::range(msg, for_tok.loc.clone()));
        if asserts > 0 {
            return fail("Object comprehension cannot have asserts.");
        }
        let [field] = value_fields.as_slice() else {
            return fail("Object comprehension can only have one field.");
        };
        match self.ast.object_field(*field) {
            Some(f) if f.hide != ObjectFieldHide::Inherit => {
                return fail("Object comprehensions cannot have hidden fields.");
            }
            Some(f) if f.kind != ObjectFieldKind::FieldExpr => {
                return fail("Object comprehensions can only have [e] fields.");
            }
            _ => {}
        }

        let (specs, end) = self.parse_comp_specs(TokenKind::BraceR)?;
        let comp = self.ast.push(
            NodeKind::ObjectComp {
                fields,
                trailing_comma: got_comma,
                specs,
            },
            span(first, &end.loc),
        );
        Ok((comp, end))
    }

    /// Field ::= FieldKey [ "(" [ Params ] ")" ] [ "+" ] ( ":" | "::" | ":::" ) Expr
    /// FieldKey ::= Id | String | "[" Expr "]"
    fn parse_object_field(
        &mut self,
        heading: Option<Comment>,
        next: &Token,
        literal_fields: &mut HashSet<String>,
    ) -> Result<NodeId, StaticError> {
        let (kind, id, expr1) = match next.kind {
            TokenKind::Identifier => {
                let id = self.push_identifier(next);
                (ObjectFieldKind::FieldId, Some(id), None)
            }
            TokenKind::StringDouble | TokenKind::StringSingle | TokenKind::StringBlock => {
                let key = self.ast.push(Self::string_literal(next), next.loc.clone());
                (ObjectFieldKind::FieldStr, None, Some(key))
            }
            _ => {
                let key = self.parse(MAX_PRECEDENCE, None)?;
                self.pop_expect(TokenKind::BracketR)?;
                (ObjectFieldKind::FieldExpr, None, Some(key))
            }
        };

        let (method_sugar, params, trailing_comma) = if self.peek().kind == TokenKind::ParenL {
            self.pop();
            let (_, params, trailing_comma) = self.parse_params_list("method parameter")?;
            (true, params, trailing_comma)
        } else {
            (false, Vec::new(), false)
        };

        let (super_sugar, hide) = self.parse_object_assignment_op()?;
        if super_sugar && method_sugar {
            return Err(StaticError::range(
                format!("Cannot use +: syntax sugar in a method: {}", next.data),
                next.loc.clone(),
            ));
        }

        if kind != ObjectFieldKind::FieldExpr && !literal_fields.insert(next.data.clone()) {
            return Err(StaticError::range(
                format!("Duplicate field: {}", next.data),
                next.loc.clone(),
            ));
        }

        let body = self.parse(MAX_PRECEDENCE, None)?;
        let loc = span(next, self.ast.loc(body));
        Ok(self.ast.push(
            NodeKind::ObjectField(ObjectField {
                kind,
                hide,
                super_sugar,
                method_sugar,
                expr1,
                id,
                params,
                trailing_comma,
                expr2: Some(body),
                expr3: None,
                heading,
            }),
            loc,
        ))
    }

    /// ObjectLocal ::= "local" Id [ "(" [ Params ] ")" ] "=" Expr
    fn parse_object_local(
        &mut self,
        local_tok: &Token,
        binds: &mut HashSet<String>,
    ) -> Result<NodeId, StaticError> {
        let var = self.pop_expect(TokenKind::Identifier)?;
        if binds.contains(&var.data) {
            return Err(StaticError::range(
                format!("Duplicate local var: {}", var.data),
                var.loc,
            ));
        }
        let id = self.push_identifier(&var);

        let (method_sugar, params, trailing_comma) = if self.peek().kind == TokenKind::ParenL {
            self.pop();
            let (_, params, trailing_comma) = self.parse_params_list("function parameter")?;
            (true, params, trailing_comma)
        } else {
            (false, Vec::new(), false)
        };
        self.pop_expect_op("=")?;

        let body = self.parse(MAX_PRECEDENCE, None)?;
        binds.insert(var.data.clone());

        let loc = span(local_tok, self.ast.loc(body));
        Ok(self.ast.push(
            NodeKind::ObjectField(ObjectField {
                kind: ObjectFieldKind::Local,
                hide: ObjectFieldHide::Visible,
                super_sugar: false,
                method_sugar,
                expr1: None,
                id: Some(id),
                params,
                trailing_comma,
                expr2: Some(body),
                expr3: None,
                heading: None,
            }),
            loc,
        ))
    }

    /// ObjectAssert ::= "assert" Expr [ ":" Expr ]
    fn parse_object_assert(&mut self, assert_tok: &Token) -> Result<NodeId, StaticError> {
        let cond = self.parse(MAX_PRECEDENCE, None)?;
        let message = if self.peek_is_op(":") {
            self.pop();
            Some(self.parse(MAX_PRECEDENCE, None)?)
        } else {
            None
        };

        let last = message.unwrap_or(cond);
        let loc = span(assert_tok, self.ast.loc(last));
        Ok(self.ast.push(
            NodeKind::ObjectField(ObjectField {
                kind: ObjectFieldKind::Assert,
                hide: ObjectFieldHide::Visible,
                super_sugar: false,
                method_sugar: false,
                expr1: None,
                id: None,
                params: Vec::new(),
                trailing_comma: false,
                expr2: Some(cond),
                expr3: message,
                heading: None,
            }),
            loc,
        ))
    }

    /// AssignmentOp ::= [ "+" ] ( ":" | "::" | ":::" )
    fn parse_object_assignment_op(&mut self) -> Result<(bool, ObjectFieldHide), StaticError> {
        let op = self.pop_expect(TokenKind::Operator)?;
        let invalid = || {
            StaticError::range(
                format!("Expected one of :, ::, :::, +:, +::, +:::, got: {}", op.data),
                op.loc.clone(),
            )
        };

        let (super_sugar, colons) = match op.data.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, op.data.as_str()),
        };
        if colons.chars().any(|c| c != ':') {
            return Err(invalid());
        }
        let hide = match colons.len() {
            1 => ObjectFieldHide::Inherit,
            2 => ObjectFieldHide::Hidden,
            3 => ObjectFieldHide::Visible,
            _ => return Err(invalid()),
        };
        Ok((super_sugar, hide))
    }

    /// CompSpecs ::= "for" Id "in" Expr { "if" Expr } { "for" Id "in" Expr { "if" Expr } }
    ///
    /// Called after the first `for` has been consumed; returns the closing token.
    fn parse_comp_specs(&mut self, end: TokenKind) -> Result<(Vec<NodeId>, Token), StaticError> {
        let mut specs = Vec::new();
        loop {
            let var = self.pop_expect(TokenKind::Identifier)?;
            let var_name = self.push_identifier(&var);
            self.pop_expect(TokenKind::In)?;
            let expr = self.parse(MAX_PRECEDENCE, None)?;
            let loc = span(&var, self.ast.loc(expr));
            specs.push(self.ast.push(NodeKind::CompSpecFor { var_name, expr }, loc));

            let mut maybe_if = self.pop();
            while maybe_if.kind == TokenKind::If {
                let cond = self.parse(MAX_PRECEDENCE, None)?;
                let loc = span(&maybe_if, self.ast.loc(cond));
                specs.push(self.ast.push(NodeKind::CompSpecIf { expr: cond }, loc));
                maybe_if = self.pop();
            }

            if maybe_if.kind == end {
                return Ok((specs, maybe_if));
            }
            if maybe_if.kind != TokenKind::For {
                return Err(StaticError::range(
                    format!("Expected for, if or {end} after for clause, got: {maybe_if}"),
                    maybe_if.loc,
                ));
            }
        }
    }

    /// Bind ::= Id [ "(" [ Params ] ")" ] "=" Expr
    fn parse_bind(&mut self, local_tok: &Token, binds: &mut Vec<NodeId>) -> Result<(), StaticError> {
        let var = self.pop_expect(TokenKind::Identifier)?;
        let duplicate = binds.iter().any(|bind| match self.ast.kind(*bind) {
            NodeKind::LocalBind { variable, .. } => {
                self.ast.identifier_name(*variable) == Some(var.data.as_str())
            }
            _ => false,
        });
        if duplicate {
            return Err(StaticError::range(
                format!("Duplicate local var: {}", var.data),
                var.loc,
            ));
        }

        let (function_sugar, params, trailing_comma) = if self.peek().kind == TokenKind::ParenL {
            self.pop();
            let (_, params, trailing_comma) = self.parse_params_list("function parameter")?;
            (true, params, trailing_comma)
        } else {
            (false, Vec::new(), false)
        };
        self.pop_expect_op("=")?;

        let body = self.parse(MAX_PRECEDENCE, None)?;
        let variable = self.push_identifier(&var);
        let loc = span(local_tok, self.ast.loc(body));
        binds.push(self.ast.push(
            NodeKind::LocalBind {
                variable,
                body,
                function_sugar,
                params,
                trailing_comma,
            },
            loc,
        ));
        Ok(())
    }

    /// Args ::= Arg { "," Arg } [ "," ]
    /// Arg ::= Expr | Id "=" Expr
    fn parse_args_list(&mut self, element_kind: &str) -> Result<(Token, Vec<NodeId>, bool), StaticError> {
        self.parse_comma_list(TokenKind::ParenR, element_kind, |p, expr| {
            let NodeKind::Var { id } = p.ast.kind(expr) else {
                return Ok(expr);
            };
            if !p.peek_is_op("=") {
                return Ok(expr);
            }
            let name = p.ast.identifier_name(*id).unwrap_or_default().to_string();
            let loc = p.ast.loc(expr).clone();
            p.pop();
            let right = p.parse(MAX_PRECEDENCE, None)?;
            Ok(p.ast.push(NodeKind::ApplyParamAssignment { id: name, right }, loc))
        })
    }

    /// Params ::= Param { "," Param } [ "," ]
    /// Param ::= Id [ "=" Expr ]
    fn parse_params_list(&mut self, element_kind: &str) -> Result<(Token, Vec<NodeId>, bool), StaticError> {
        self.parse_comma_list(TokenKind::ParenR, element_kind, |p, expr| {
            let loc = p.ast.loc(expr).clone();
            let name = match p.ast.kind(expr) {
                NodeKind::Var { id } => p.ast.identifier_name(*id).unwrap_or_default().to_string(),
                _ => {
                    return Err(StaticError::range(
                        "Expected simple identifier but got a complex expression.",
                        loc,
                    ))
                }
            };
            let default_value = if p.peek_is_op("=") {
                p.pop();
                Some(p.parse(MAX_PRECEDENCE, None)?)
            } else {
                None
            };
            Ok(p.ast.push(
                NodeKind::FunctionParam {
                    id: name,
                    default_value,
                },
                loc,
            ))
        })
    }

    /// Parses elements up to and including `end`. Returns the closing token,
    /// the mapped elements, and whether a trailing comma was present.
    fn parse_comma_list(
        &mut self,
        end: TokenKind,
        element_kind: &str,
        mut element: impl FnMut(&mut Self, NodeId) -> Result<NodeId, StaticError>,
    ) -> Result<(Token, Vec<NodeId>, bool), StaticError> {
        let mut exprs = Vec::new();
        let mut got_comma = false;
        let mut first = true;
        loop {
            if !first && !got_comma && self.peek().kind == TokenKind::Comma {
                self.pop();
                got_comma = true;
            }
            let next = self.peek();
            if next.kind == end {
                return Ok((self.pop(), exprs, got_comma));
            }
            if !first && !got_comma {
                return Err(StaticError::range(
                    format!("Expected a comma before next {element_kind}."),
                    next.loc.clone(),
                ));
            }

            let expr = self.parse(MAX_PRECEDENCE, None)?;
            exprs.push(element(self, expr)?);
            got_comma = false;
            first = false;
        }
    }

    /// Last bind's body, when it is a variable or `x + variable`.
    fn rest_from_binds(&self, binds: &[NodeId]) -> Option<NodeId> {
        let NodeKind::LocalBind { body, .. } = self.ast.kind(*binds.last()?) else {
            return None;
        };
        match self.ast.kind(*body) {
            NodeKind::Binary {
                op: BinaryOp::Plus,
                right,
                ..
            } if matches!(self.ast.kind(*right), NodeKind::Var { .. }) => Some(*right),
            NodeKind::Var { .. } => Some(*body),
            _ => None,
        }
    }

    // === Comments ===

    /// Consumes a block of comments at the current position, if any. Line
    /// comments separated by a blank line start a new block; switching
    /// comment style discards what was collected so far.
    fn parse_optional_comments(&mut self) -> Option<Comment> {
        let mut kind: Option<CommentKind> = None;
        let mut lines: Vec<String> = Vec::new();
        let mut begin: Option<LocationRange> = None;
        let mut end = LocationRange::default();

        loop {
            let curr = self.peek_raw();
            let curr_kind = match curr.kind {
                TokenKind::CommentCpp => CommentKind::Cpp,
                TokenKind::CommentHash => CommentKind::Hash,
                TokenKind::CommentC => CommentKind::C,
                _ => break,
            };
            let curr = self.pop_raw();

            let restart = kind != Some(curr_kind)
                || curr_kind == CommentKind::C
                || curr.fodder.iter().any(|f| BLANK_LINE.is_match(&f.data));
            if restart {
                kind = Some(curr_kind);
                lines.clear();
                begin = Some(curr.loc.clone());
            }

            if curr_kind == CommentKind::C {
                lines.extend(curr.data.split('\n').map(|line| {
                    C_COMMENT_MARGIN.replace(line, "").into_owned()
                }));
            } else {
                lines.push(curr.data.clone());
            }
            end = curr.loc;
        }

        let (kind, begin) = (kind?, begin?);
        Some(Comment {
            kind,
            text: lines,
            loc: LocationRange::new(begin.file_name, begin.begin, end.end),
        })
    }

    // === Construction Helpers ===

    fn push_identifier(&mut self, tok: &Token) -> NodeId {
        self.ast.push(
            NodeKind::Identifier {
                name: tok.data.clone(),
            },
            tok.loc.clone(),
        )
    }

    fn string_literal(tok: &Token) -> NodeKind {
        let kind = match tok.kind {
            TokenKind::StringSingle => LiteralStringKind::Single,
            TokenKind::StringBlock => LiteralStringKind::Block,
            _ => LiteralStringKind::Double,
        };
        NodeKind::LiteralString {
            value: tok.data.clone(),
            kind,
            block_indent: tok.string_block_indent.clone(),
        }
    }

    // === Tokenizer Helper Methods ===

    fn last_index(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    /// The next token, skipping comments.
    fn peek(&self) -> &Token {
        let mut i = self.position;
        while i < self.last_index() && self.tokens[i].kind.is_comment() {
            i += 1;
        }
        &self.tokens[i.min(self.last_index())]
    }

    /// The next token, comments included.
    fn peek_raw(&self) -> &Token {
        &self.tokens[self.position.min(self.last_index())]
    }

    fn peek_is_op(&self, op: &str) -> bool {
        let next = self.peek();
        next.kind == TokenKind::Operator && next.data == op
    }

    /// Consumes the next token, skipping comments. The end-of-file token is
    /// never consumed, so popping past it keeps returning it.
    fn pop(&mut self) -> Token {
        while self.position < self.last_index() && self.tokens[self.position].kind.is_comment() {
            self.position += 1;
        }
        self.pop_raw()
    }

    fn pop_raw(&mut self) -> Token {
        let tok = self.peek_raw().clone();
        if self.position < self.last_index() {
            self.position += 1;
        }
        tok
    }

    fn pop_expect(&mut self, kind: TokenKind) -> Result<Token, StaticError> {
        let tok = self.pop();
        if tok.kind != kind {
            return Err(StaticError::range(
                format!("Expected token {kind} but got {tok}"),
                tok.loc,
            ));
        }
        Ok(tok)
    }

    fn pop_expect_op(&mut self, op: &str) -> Result<Token, StaticError> {
        let tok = self.pop();
        if tok.kind != TokenKind::Operator || tok.data != op {
            return Err(StaticError::range(
                format!("Expected operator {op} but got {tok}"),
                tok.loc,
            ));
        }
        Ok(tok)
    }
}
