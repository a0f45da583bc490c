use crate::error::StaticError;
use crate::location::{Location, LocationRange};
use std::fmt;
use thiserror::Error;

// === Fodder ===

/// Kinds of text kept between tokens so the source can be rebuilt exactly.
/// Comments are emitted as tokens, so only whitespace ends up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FodderKind {
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FodderElement {
    pub kind: FodderKind,
    pub data: String,
}

// === Tokens ===

/// The closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // == Symbols ==
    BraceL,
    BraceR,
    BracketL,
    BracketR,
    Comma,
    Dollar,
    Dot,
    ParenL,
    ParenR,
    Semicolon,

    // == Arbitrary length lexemes ==
    Identifier,
    Number,
    Operator,
    StringBlock,
    StringDouble,
    StringSingle,
    CommentCpp,
    CommentC,
    CommentHash,

    // == Keywords ==
    Assert,
    Else,
    Error,
    False,
    For,
    Function,
    If,
    Import,
    ImportStr,
    In,
    Local,
    Null,
    SelfKw,
    Super,
    TailStrict,
    Then,
    True,

    /// Holds the trailing fodder and the location of the end of the file.
    EndOfFile,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::BraceL => "\"{\"",
            TokenKind::BraceR => "\"}\"",
            TokenKind::BracketL => "\"[\"",
            TokenKind::BracketR => "\"]\"",
            TokenKind::Comma => "\",\"",
            TokenKind::Dollar => "\"$\"",
            TokenKind::Dot => "\".\"",
            TokenKind::ParenL => "\"(\"",
            TokenKind::ParenR => "\")\"",
            TokenKind::Semicolon => "\";\"",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Number => "NUMBER",
            TokenKind::Operator => "OPERATOR",
            TokenKind::StringBlock => "STRING_BLOCK",
            TokenKind::StringDouble => "STRING_DOUBLE",
            TokenKind::StringSingle => "STRING_SINGLE",
            TokenKind::CommentCpp => "CPP_COMMENT",
            TokenKind::CommentC => "C_COMMENT",
            TokenKind::CommentHash => "HASH_COMMENT",
            TokenKind::Assert => "assert",
            TokenKind::Else => "else",
            TokenKind::Error => "error",
            TokenKind::False => "false",
            TokenKind::For => "for",
            TokenKind::Function => "function",
            TokenKind::If => "if",
            TokenKind::Import => "import",
            TokenKind::ImportStr => "importstr",
            TokenKind::In => "in",
            TokenKind::Local => "local",
            TokenKind::Null => "null",
            TokenKind::SelfKw => "self",
            TokenKind::Super => "super",
            TokenKind::TailStrict => "tailstrict",
            TokenKind::Then => "then",
            TokenKind::True => "true",
            TokenKind::EndOfFile => "end of file",
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            TokenKind::CommentCpp | TokenKind::CommentC | TokenKind::CommentHash
        )
    }

    fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "assert" => TokenKind::Assert,
            "else" => TokenKind::Else,
            "error" => TokenKind::Error,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "importstr" => TokenKind::ImportStr,
            "in" => TokenKind::In,
            "local" => TokenKind::Local,
            "null" => TokenKind::Null,
            "self" => TokenKind::SelfKw,
            "super" => TokenKind::Super,
            "tailstrict" => TokenKind::TailStrict,
            "then" => TokenKind::Then,
            "true" => TokenKind::True,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lexed token. `data` holds the literal content (quotes and comment
/// markers stripped); `pos_start..pos_end` is the byte span of the raw
/// lexeme in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub fodder: Vec<FodderElement>,
    pub data: String,
    /// Only set for `StringBlock`: the indentation of the block lines.
    pub string_block_indent: String,
    /// Only set for `StringBlock`: the indentation before the closing `|||`.
    pub string_block_term_indent: String,
    pub loc: LocationRange,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    /// The source text of the lexeme, including quotes and comment markers.
    pub fn raw<'a>(&self, source: &'a str) -> &'a str {
        &source[self.pos_start..self.pos_end]
    }

    pub fn fodder_text(&self) -> String {
        self.fodder.iter().map(|f| f.data.as_str()).collect()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_empty() {
            write!(f, "{}", self.kind)
        } else if self.kind == TokenKind::Operator {
            write!(f, "\"{}\"", self.data)
        } else {
            write!(f, "({}, \"{}\")", self.kind, self.data)
        }
    }
}

/// A failed lex: the tokens produced before the failure, and the error.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct LexFailure {
    pub tokens: Vec<Token>,
    pub error: StaticError,
}

// === Helpers ===

fn is_identifier_first(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier(c: char) -> bool {
    is_identifier_first(c) || c.is_ascii_digit()
}

fn is_symbol(c: char) -> bool {
    matches!(
        c,
        '!' | '$' | ':' | '~' | '+' | '-' | '&' | '|' | '^' | '=' | '<' | '>' | '*' | '/' | '%'
    )
}

/// Checks that `b` starts with the whitespace prefix of `a` and returns the
/// length of that prefix; 0 when `a` has none or `b` does not match it.
pub fn check_whitespace(a: &str, b: &str) -> usize {
    let b = b.as_bytes();
    for (i, ca) in a.bytes().enumerate() {
        if ca != b' ' && ca != b'\t' {
            return i;
        }
        if i >= b.len() || b[i] != ca {
            return 0;
        }
    }
    a.len()
}

// === Lexer ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumState {
    Begin,
    AfterZero,
    AfterOneToNine,
    AfterDot,
    AfterDigit,
    AfterE,
    AfterExpSign,
    AfterExpDigit,
}

/// Scans code points with line/column tracking. `backup` undoes at most one `next`.
pub struct Lexer<'a> {
    file_name: String,
    input: &'a str,
    chars: Vec<char>,
    offsets: Vec<usize>,

    pos: usize,
    line_number: usize,
    line_start: usize,

    prev_pos: Option<usize>,
    prev_line_number: usize,
    prev_line_start: usize,

    tokens: Vec<Token>,
    fodder: Vec<FodderElement>,
    token_start: usize,
    token_start_loc: Location,
}

impl<'a> Lexer<'a> {
    pub fn new(file_name: &str, input: &'a str) -> Self {
        let (offsets, chars) = input.char_indices().unzip();
        Lexer {
            file_name: file_name.to_string(),
            input,
            chars,
            offsets,
            pos: 0,
            line_number: 1,
            line_start: 0,
            prev_pos: None,
            prev_line_number: 1,
            prev_line_start: 0,
            tokens: Vec::new(),
            fodder: Vec::new(),
            token_start: 0,
            token_start_loc: Location::new(1, 1),
        }
    }

    fn next(&mut self) -> Option<char> {
        self.prev_pos = Some(self.pos);
        self.prev_line_number = self.line_number;
        self.prev_line_start = self.line_start;
        let c = *self.chars.get(self.pos)?;
        self.pos += 1;
        if c == '\n' {
            self.line_number += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn accept_n(&mut self, n: usize) {
        for _ in 0..n {
            self.next();
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn backup(&mut self) {
        if let Some(prev) = self.prev_pos.take() {
            self.pos = prev;
            self.line_number = self.prev_line_number;
            self.line_start = self.prev_line_start;
        }
    }

    fn byte_at(&self, pos: usize) -> usize {
        self.offsets.get(pos).copied().unwrap_or(self.input.len())
    }

    fn rest(&self) -> &'a str {
        &self.input[self.byte_at(self.pos)..]
    }

    fn slice(&self, begin: usize, end: usize) -> &'a str {
        &self.input[self.byte_at(begin)..self.byte_at(end)]
    }

    fn location(&self) -> Location {
        Location::new(self.line_number, self.pos - self.line_start + 1)
    }

    fn prev_location(&self) -> Location {
        let prev = self.prev_pos.unwrap_or(self.pos);
        Location::new(self.prev_line_number, prev - self.prev_line_start + 1)
    }

    fn reset_token_start(&mut self) {
        self.token_start = self.pos;
        self.token_start_loc = self.location();
    }

    fn error_at(&self, msg: String, loc: Location) -> StaticError {
        StaticError::point(msg, &self.file_name, loc)
    }

    fn emit_full_token(
        &mut self,
        kind: TokenKind,
        data: String,
        string_block_indent: String,
        string_block_term_indent: String,
    ) {
        let token = Token {
            kind,
            fodder: std::mem::take(&mut self.fodder),
            data,
            string_block_indent,
            string_block_term_indent,
            loc: LocationRange::new(self.file_name.clone(), self.token_start_loc, self.location()),
            pos_start: self.byte_at(self.token_start),
            pos_end: self.byte_at(self.pos),
        };
        self.tokens.push(token);
        self.reset_token_start();
    }

    /// Emits the text between the token start and the cursor, trimmed by
    /// `skip_front`/`skip_back` code points, as the token data.
    fn emit_trimmed(&mut self, kind: TokenKind, skip_front: usize, skip_back: usize) {
        let data = self
            .slice(self.token_start + skip_front, self.pos - skip_back)
            .to_string();
        self.emit_full_token(kind, data, String::new(), String::new());
    }

    fn emit_token(&mut self, kind: TokenKind) {
        self.emit_trimmed(kind, 0, 0);
    }

    fn add_whitespace_fodder(&mut self) {
        let data = self.slice(self.token_start, self.pos);
        match self.fodder.last_mut() {
            Some(last) if last.kind == FodderKind::Whitespace => last.data.push_str(data),
            _ => self.fodder.push(FodderElement {
                kind: FodderKind::Whitespace,
                data: data.to_string(),
            }),
        }
        self.reset_token_start();
    }

    /// Lexes the whole input.
    pub fn lex(self) -> Result<Vec<Token>, LexFailure> {
        self.lex_until(None)
    }

    /// Lexes until the token stream has passed `range_max`, truncating any
    /// tokens that start after it. At least one token is always lexed.
    pub fn lex_until(mut self, range_max: Option<Location>) -> Result<Vec<Token>, LexFailure> {
        loop {
            if let Some(max) = range_max {
                if self.check_truncate_token_range(max) {
                    self.emit_truncated_eof();
                    return Ok(self.tokens);
                }
            }
            let Some(c) = self.next() else { break };
            if let Err(error) = self.lex_one(c) {
                return Err(LexFailure {
                    tokens: self.tokens,
                    error,
                });
            }
        }
        self.emit_token(TokenKind::EndOfFile);
        Ok(self.tokens)
    }

    fn lex_one(&mut self, c: char) -> Result<(), StaticError> {
        match c {
            ' ' | '\t' | '\r' | '\n' => self.add_whitespace_fodder(),
            '{' => self.emit_token(TokenKind::BraceL),
            '}' => self.emit_token(TokenKind::BraceR),
            '[' => self.emit_token(TokenKind::BracketL),
            ']' => self.emit_token(TokenKind::BracketR),
            ',' => self.emit_token(TokenKind::Comma),
            '.' => self.emit_token(TokenKind::Dot),
            '(' => self.emit_token(TokenKind::ParenL),
            ')' => self.emit_token(TokenKind::ParenR),
            ';' => self.emit_token(TokenKind::Semicolon),
            '0'..='9' => {
                self.backup();
                self.lex_number()?;
            }
            '"' => self.lex_string('"', TokenKind::StringDouble)?,
            '\'' => self.lex_string('\'', TokenKind::StringSingle)?,
            '#' => {
                while let Some(c) = self.next() {
                    if c == '\n' {
                        // The newline stays behind as fodder for the next token.
                        self.backup();
                        break;
                    }
                }
                self.emit_trimmed(TokenKind::CommentHash, 1, 0);
            }
            c if is_identifier_first(c) => {
                self.backup();
                self.lex_identifier();
            }
            c if is_symbol(c) => {
                self.backup();
                self.lex_symbol()?;
            }
            c => {
                return Err(self.error_at(
                    format!("Could not lex the character '{c}'"),
                    self.prev_location(),
                ))
            }
        }
        Ok(())
    }

    /// Lexes a JSON-style number (without sign). The next code point must be a digit.
    fn lex_number(&mut self) -> Result<(), StaticError> {
        let mut state = NumState::Begin;
        loop {
            let r = self.next();
            let c = r.unwrap_or('\0');
            state = match (state, c) {
                (NumState::Begin, '0') => NumState::AfterZero,
                (NumState::Begin, _) => NumState::AfterOneToNine,
                (NumState::AfterZero | NumState::AfterOneToNine | NumState::AfterDigit, 'e' | 'E') => {
                    NumState::AfterE
                }
                (NumState::AfterZero | NumState::AfterOneToNine, '.') => NumState::AfterDot,
                (NumState::AfterOneToNine, '0'..='9') => NumState::AfterOneToNine,
                (NumState::AfterDot | NumState::AfterDigit, '0'..='9') => NumState::AfterDigit,
                (NumState::AfterDot, _) => {
                    return Err(self.error_at(
                        format!("Couldn't lex number, junk after decimal point: '{c}'"),
                        self.prev_location(),
                    ))
                }
                (NumState::AfterE, '+' | '-') => NumState::AfterExpSign,
                (NumState::AfterE | NumState::AfterExpSign | NumState::AfterExpDigit, '0'..='9') => {
                    NumState::AfterExpDigit
                }
                (NumState::AfterE, _) => {
                    return Err(self.error_at(
                        format!("Couldn't lex number, junk after 'E': '{c}'"),
                        self.prev_location(),
                    ))
                }
                (NumState::AfterExpSign, _) => {
                    return Err(self.error_at(
                        format!("Couldn't lex number, junk after exponent sign: '{c}'"),
                        self.prev_location(),
                    ))
                }
                _ => break,
            };
        }
        self.backup();
        self.emit_token(TokenKind::Number);
        Ok(())
    }

    /// Lexes an identifier or keyword. The next code point must be an identifier start.
    fn lex_identifier(&mut self) {
        while let Some(c) = self.next() {
            if !is_identifier(c) {
                self.backup();
                break;
            }
        }
        let text = self.slice(self.token_start, self.pos);
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
        self.emit_token(kind);
    }

    /// Lexes a quoted string; the opening quote has been consumed.
    fn lex_string(&mut self, quote: char, kind: TokenKind) -> Result<(), StaticError> {
        let start_loc = self.token_start_loc;
        loop {
            match self.next() {
                None => {
                    return Err(self.error_at("Unterminated String".to_string(), start_loc));
                }
                Some(c) if c == quote => {
                    self.emit_trimmed(kind, 1, 1);
                    return Ok(());
                }
                Some('\\') if self.peek().is_some() => {
                    self.next();
                }
                Some(_) => {}
            }
        }
    }

    /// Lexes a comment, a text block, or an operator.
    fn lex_symbol(&mut self) -> Result<(), StaticError> {
        let r = self.next();

        if r == Some('/') && self.peek() == Some('/') {
            self.next();
            while let Some(c) = self.next() {
                if c == '\n' {
                    self.backup();
                    break;
                }
            }
            self.emit_trimmed(TokenKind::CommentCpp, 2, 0);
            return Ok(());
        }

        if r == Some('/') && self.peek() == Some('*') {
            let start_loc = self.token_start_loc;
            self.next();
            loop {
                match self.next() {
                    None => {
                        return Err(self.error_at(
                            "Multi-line comment has no terminating */".to_string(),
                            start_loc,
                        ))
                    }
                    Some('*') if self.peek() == Some('/') => {
                        self.next();
                        self.emit_trimmed(TokenKind::CommentC, 2, 2);
                        return Ok(());
                    }
                    Some(_) => {}
                }
            }
        }

        if r == Some('|') && self.rest().starts_with("||\n") {
            return self.lex_text_block();
        }

        // Any run of symbols is one operator, except that comments and text
        // blocks cut it short.
        while let Some(c) = self.next() {
            let rest = self.rest();
            let cut = !is_symbol(c)
                || (c == '/' && (rest.starts_with('/') || rest.starts_with('*')))
                || (c == '|' && rest.starts_with("||"));
            if cut {
                self.backup();
                break;
            }
        }

        // Operators may only end in + - ~ ! when they are one code point long.
        while self.pos > self.token_start + 1
            && matches!(self.chars[self.pos - 1], '+' | '-' | '~' | '!')
        {
            self.pos -= 1;
        }

        if self.slice(self.token_start, self.pos) == "$" {
            self.emit_token(TokenKind::Dollar);
        } else {
            self.emit_token(TokenKind::Operator);
        }
        Ok(())
    }

    /// Lexes `|||` text blocks; the first `|` has been consumed.
    fn lex_text_block(&mut self) -> Result<(), StaticError> {
        let start_loc = self.token_start_loc;
        self.accept_n(3);
        let mut data = String::new();

        while self.peek() == Some('\n') {
            self.next();
            data.push('\n');
        }

        let first_line = self.rest();
        let mut num_whitespace = check_whitespace(first_line, first_line);
        let indent = first_line[..num_whitespace].to_string();
        if num_whitespace == 0 {
            return Err(self.error_at(
                "Text block's first line must start with whitespace".to_string(),
                start_loc,
            ));
        }

        loop {
            self.accept_n(num_whitespace);
            loop {
                match self.next() {
                    None => return Err(self.error_at("Unexpected EOF".to_string(), start_loc)),
                    Some('\n') => break,
                    Some(c) => data.push(c),
                }
            }
            data.push('\n');

            while self.peek() == Some('\n') {
                self.next();
                data.push('\n');
            }

            num_whitespace = check_whitespace(&indent, self.rest());
            if num_whitespace == 0 {
                let mut term_indent = String::new();
                while let Some(c @ (' ' | '\t')) = self.peek() {
                    self.next();
                    term_indent.push(c);
                }
                if !self.rest().starts_with("|||") {
                    return Err(self.error_at(
                        "Text block not terminated with |||".to_string(),
                        start_loc,
                    ));
                }
                self.accept_n(3);
                self.emit_full_token(TokenKind::StringBlock, data, indent, term_indent);
                return Ok(());
            }
        }
    }

    // === Bounded lexing ===

    fn loc_in_last_token_range(&self, loc: Location) -> bool {
        self.tokens.last().is_some_and(|t| loc.in_range(&t.loc))
    }

    fn loc_before_last_token_range(&self, loc: Location) -> bool {
        self.tokens
            .last()
            .is_some_and(|t| loc.strictly_before_range(&t.loc))
    }

    /// Returns true when lexing can stop because the stream has reached
    /// `range_max`, popping tokens that begin after it. When `range_max`
    /// falls in whitespace the stream ends at the last token before it.
    fn check_truncate_token_range(&mut self, range_max: Location) -> bool {
        if !range_max.is_set() || self.tokens.is_empty() {
            return false;
        }
        loop {
            if self.tokens.is_empty() || self.loc_in_last_token_range(range_max) {
                return true;
            }
            if self.loc_before_last_token_range(range_max) {
                self.tokens.pop();
                if !self.loc_before_last_token_range(range_max) {
                    return true;
                }
                continue;
            }
            return false;
        }
    }

    fn emit_truncated_eof(&mut self) {
        let (loc, pos) = match self.tokens.last() {
            Some(last) => (
                LocationRange::new(self.file_name.clone(), last.loc.end, last.loc.end),
                last.pos_end,
            ),
            None => (
                LocationRange::point(self.file_name.clone(), Location::new(1, 1)),
                0,
            ),
        };
        self.tokens.push(Token {
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
}

/// Lexes `input` into a token stream ending in `EndOfFile`.
pub fn lex(file_name: &str, input: &str) -> Result<Vec<Token>, LexFailure> {
    Lexer::new(file_name, input).lex()
}

/// Lexes `input` only as far as needed to cover `range_max`.
pub fn lex_range(file_name: &str, input: &str, range_max: Location) -> Result<Vec<Token>, LexFailure> {
    Lexer::new(file_name, input).lex_until(Some(range_max))
}

/// Rebuilds source text from a token stream: each token's fodder, then its lexeme.
pub fn render(source: &str, tokens: &[Token]) -> String {
    let mut out = String::with_capacity(source.len());
    for token in tokens {
        for fodder in &token.fodder {
            out.push_str(&fodder.data);
        }
        out.push_str(token.raw(source));
    }
    out
}
