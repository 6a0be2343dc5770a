//! Token definitions and the keyword, directive, and operator tables.

use std::fmt;

/// Closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Number,
    Identifier,
    String,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semicolon,
    Colon,
    Comma,
    Equals,
    Bang,
    Less,
    Greater,
    EqualEqual,
    BangEqual,
    LessEqual,
    GreaterEqual,
    Walrus,
    Increment,
    Decrement,
    AndAnd,
    OrOr,
    PlusEquals,
    MinusEquals,
    StarEquals,
    SlashEquals,

    // Keywords
    Uint,
    Int,
    Float,
    Char,
    Bool,
    Str,
    Var,
    Const,
    Fn,
    Return,
    If,
    Elif,
    Else,
    Struct,
    Enum,
    Pub,
    Priv,
    Loop,
    Print,
    Println,

    // Directives
    Module,
    Use,
    Alloc,
    Free,
    Memcpy,
    Sizeof,
    Cast,

    Eof,
    Unknown,
}

impl TokenKind {
    /// Primitive type keywords accepted in type position.
    pub fn is_type_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::Uint
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Char
                | TokenKind::Bool
                | TokenKind::Str
        )
    }

    /// `@` directives.
    pub fn is_directive(self) -> bool {
        matches!(
            self,
            TokenKind::Module
                | TokenKind::Use
                | TokenKind::Alloc
                | TokenKind::Free
                | TokenKind::Memcpy
                | TokenKind::Sizeof
                | TokenKind::Cast
        )
    }

    /// Keywords and directives.
    pub fn is_keyword(self) -> bool {
        self.is_directive() || KEYWORDS.iter().any(|(_, kind)| *kind == self)
    }
}

/// Exact-match keyword table. `have` is an alias of `var`.
pub const KEYWORDS: &[(&str, TokenKind)] = &[
    ("uint", TokenKind::Uint),
    ("int", TokenKind::Int),
    ("float", TokenKind::Float),
    ("char", TokenKind::Char),
    ("bool", TokenKind::Bool),
    ("str", TokenKind::Str),
    ("var", TokenKind::Var),
    ("have", TokenKind::Var),
    ("const", TokenKind::Const),
    ("fn", TokenKind::Fn),
    ("return", TokenKind::Return),
    ("if", TokenKind::If),
    ("elif", TokenKind::Elif),
    ("else", TokenKind::Else),
    ("struct", TokenKind::Struct),
    ("enum", TokenKind::Enum),
    ("pub", TokenKind::Pub),
    ("priv", TokenKind::Priv),
    ("loop", TokenKind::Loop),
    ("print", TokenKind::Print),
    ("println", TokenKind::Println),
];

/// Directive table, matched including the leading `@`.
pub const DIRECTIVES: &[(&str, TokenKind)] = &[
    ("@module", TokenKind::Module),
    ("@use", TokenKind::Use),
    ("@output", TokenKind::Print),
    ("@outputln", TokenKind::Println),
    ("@alloc", TokenKind::Alloc),
    ("@free", TokenKind::Free),
    ("@memcpy", TokenKind::Memcpy),
    ("@sizeof", TokenKind::Sizeof),
    ("@cast", TokenKind::Cast),
];

/// Two-character operators, tried before [`SINGLE_CHAR_TOKENS`].
pub const DOUBLE_CHAR_TOKENS: &[(&[u8; 2], TokenKind)] = &[
    (b"==", TokenKind::EqualEqual),
    (b"!=", TokenKind::BangEqual),
    (b"<=", TokenKind::LessEqual),
    (b">=", TokenKind::GreaterEqual),
    (b":=", TokenKind::Walrus),
    (b"++", TokenKind::Increment),
    (b"--", TokenKind::Decrement),
    (b"&&", TokenKind::AndAnd),
    (b"||", TokenKind::OrOr),
    (b"+=", TokenKind::PlusEquals),
    (b"-=", TokenKind::MinusEquals),
    (b"*=", TokenKind::StarEquals),
    (b"/=", TokenKind::SlashEquals),
];

pub const SINGLE_CHAR_TOKENS: &[(u8, TokenKind)] = &[
    (b'+', TokenKind::Plus),
    (b'-', TokenKind::Minus),
    (b'*', TokenKind::Star),
    (b'/', TokenKind::Slash),
    (b'%', TokenKind::Percent),
    (b'(', TokenKind::LParen),
    (b')', TokenKind::RParen),
    (b';', TokenKind::Semicolon),
    (b',', TokenKind::Comma),
    (b'{', TokenKind::LBrace),
    (b'}', TokenKind::RBrace),
    (b'[', TokenKind::LBracket),
    (b']', TokenKind::RBracket),
    (b':', TokenKind::Colon),
    (b'=', TokenKind::Equals),
    (b'<', TokenKind::Less),
    (b'>', TokenKind::Greater),
    (b'!', TokenKind::Bang),
];

pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    KEYWORDS
        .iter()
        .find(|(text, _)| *text == ident)
        .map(|(_, kind)| *kind)
}

pub fn lookup_directive(ident: &str) -> Option<TokenKind> {
    DIRECTIVES
        .iter()
        .find(|(text, _)| *text == ident)
        .map(|(_, kind)| *kind)
}

pub fn lookup_double(a: u8, b: u8) -> Option<TokenKind> {
    DOUBLE_CHAR_TOKENS
        .iter()
        .find(|(pair, _)| pair[0] == a && pair[1] == b)
        .map(|(_, kind)| *kind)
}

pub fn lookup_single(c: u8) -> Option<TokenKind> {
    SINGLE_CHAR_TOKENS
        .iter()
        .find(|(ch, _)| *ch == c)
        .map(|(_, kind)| *kind)
}

/// A scanned token. `text` is the raw lexeme, quotes included for strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    /// 1-based line.
    pub line: usize,
    /// 1-based column of the first character.
    pub column: usize,
    /// Spaces, tabs, and carriage returns since the previous token on this line.
    pub leading_whitespace: usize,
}

impl Token<'_> {
    /// Column just past the last character of the lexeme.
    pub fn end_column(&self) -> usize {
        self.column + self.text.chars().count()
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {:?} '{}'",
            self.line, self.column, self.kind, self.text
        )
    }
}
