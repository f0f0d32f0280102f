//! 스크립트 어휘 분석기
//!
//! 스크립트 본문과 그 안에 포함된 표현식은 같은 토큰 스트림을 공유합니다.
//! 공백과 `//` 주석은 버리고, 줄바꿈은 문장 종결자로 쓰이므로 [`TokenKind::Eol`]로
//! 남깁니다. 어휘 오류는 진단으로 모으고 해당 문자를 건너뛰어 계속 진행합니다.

use std::fmt;

use crate::error::Diagnostic;

/// 토큰 종류
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Uint(u64),
    Float(f64),
    True,
    False,
    Null,
    If,
    Else,
    Set,
    Unset,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Dot,
    Comma,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Assign,
    Semicolon,
    Eol,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Ident(name) => return write!(f, "identifier '{name}'"),
            Self::String(_) => "string literal",
            Self::Bytes(_) => "bytes literal",
            Self::Int(_) | Self::Uint(_) | Self::Float(_) => "number",
            Self::True => "'true'",
            Self::False => "'false'",
            Self::Null => "'null'",
            Self::If => "'if'",
            Self::Else => "'else'",
            Self::Set => "'set'",
            Self::Unset => "'unset'",
            Self::In => "'in'",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::Slash => "'/'",
            Self::Percent => "'%'",
            Self::EqEq => "'=='",
            Self::NotEq => "'!='",
            Self::Lt => "'<'",
            Self::Le => "'<='",
            Self::Gt => "'>'",
            Self::Ge => "'>='",
            Self::AndAnd => "'&&'",
            Self::OrOr => "'||'",
            Self::Bang => "'!'",
            Self::Question => "'?'",
            Self::Colon => "':'",
            Self::Dot => "'.'",
            Self::Comma => "','",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::Assign => "'='",
            Self::Semicolon => "';'",
            Self::Eol => "end of line",
            Self::Eof => "end of input",
        };
        f.write_str(symbol)
    }
}

/// 위치 정보가 붙은 토큰
///
/// `line`은 1부터, `column`은 0부터 세는 문자 단위 위치이고
/// `start..end`는 원본의 바이트 범위입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    pub start: usize,
    pub end: usize,
}

/// 원본 전체를 토큰으로 나눕니다.
///
/// 결과는 항상 [`TokenKind::Eof`]로 끝납니다. 어휘 오류가 있어도 가능한 만큼
/// 토큰을 만들고 진단을 함께 반환합니다.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer {
        source,
        chars: source.char_indices().peekable(),
        line: 1,
        line_start: 0,
        tokens: Vec::new(),
        errors: Vec::new(),
    };
    lexer.run();
    (lexer.tokens, lexer.errors)
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    line_start: usize,
    tokens: Vec<Token>,
    errors: Vec<Diagnostic>,
}

impl Lexer<'_> {
    fn column(&self, offset: usize) -> usize {
        self.source[self.line_start..offset].chars().count()
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map_or(self.source.len(), |(offset, _)| *offset)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let (offset, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.line_start = offset + 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&mut self, line: usize, column: usize, message: impl Into<String>) {
        self.errors.push(Diagnostic::new(line, column, message));
    }

    fn run(&mut self) {
        loop {
            let start = self.offset();
            let line = self.line;
            let column = self.column(start);
            let Some(c) = self.bump() else {
                self.push(TokenKind::Eof, line, column, start);
                return;
            };

            let kind = match c {
                '\n' => TokenKind::Eol,
                c if c.is_whitespace() => continue,
                '/' if self.peek() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '?' => TokenKind::Question,
                ':' => TokenKind::Colon,
                ',' => TokenKind::Comma,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                ';' => TokenKind::Semicolon,
                '=' if self.eat('=') => TokenKind::EqEq,
                '=' => TokenKind::Assign,
                '!' if self.eat('=') => TokenKind::NotEq,
                '!' => TokenKind::Bang,
                '<' if self.eat('=') => TokenKind::Le,
                '<' => TokenKind::Lt,
                '>' if self.eat('=') => TokenKind::Ge,
                '>' => TokenKind::Gt,
                '&' if self.eat('&') => TokenKind::AndAnd,
                '|' if self.eat('|') => TokenKind::OrOr,
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    match self.number(start) {
                        Some(kind) => kind,
                        None => continue,
                    }
                }
                '.' => TokenKind::Dot,
                '"' | '\'' => match self.string(c, false, line, column) {
                    Some(text) => TokenKind::String(text),
                    None => continue,
                },
                'r' | 'R' | 'b' | 'B' if self.is_string_prefix() => {
                    match self.prefixed_string(c, line, column) {
                        Some(kind) => kind,
                        None => continue,
                    }
                }
                c if c.is_ascii_digit() => match self.number(start) {
                    Some(kind) => kind,
                    None => continue,
                },
                c if is_ident_start(c) => {
                    while self.peek().is_some_and(is_ident_continue) {
                        self.bump();
                    }
                    let end = self.offset();
                    keyword_or_ident(&self.source[start..end])
                }
                other => {
                    self.error(line, column, format!("token recognition error at: '{other}'"));
                    continue;
                }
            };
            self.push(kind, line, column, start);
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize, start: usize) {
        let end = self.offset();
        self.tokens.push(Token {
            kind,
            line,
            column,
            start,
            end,
        });
    }

    fn is_string_prefix(&mut self) -> bool {
        match self.peek() {
            Some('"' | '\'') => true,
            Some('r' | 'R' | 'b' | 'B') => matches!(self.peek_second(), Some('"' | '\'')),
            _ => false,
        }
    }

    fn prefixed_string(&mut self, first: char, line: usize, column: usize) -> Option<TokenKind> {
        let mut raw = matches!(first, 'r' | 'R');
        let mut bytes = matches!(first, 'b' | 'B');
        if let Some(second @ ('r' | 'R' | 'b' | 'B')) = self.peek() {
            self.bump();
            raw |= matches!(second, 'r' | 'R');
            bytes |= matches!(second, 'b' | 'B');
        }
        let quote = self.bump()?;
        let text = self.string(quote, raw, line, column)?;
        Some(if bytes {
            TokenKind::Bytes(text.into_bytes())
        } else {
            TokenKind::String(text)
        })
    }

    /// 여는 따옴표 다음부터 문자열 본문을 읽습니다. 세 겹 따옴표는 여러 줄을 허용합니다.
    fn string(&mut self, quote: char, raw: bool, line: usize, column: usize) -> Option<String> {
        let triple = self.peek() == Some(quote) && self.peek_second() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        } else if self.eat(quote) {
            return Some(String::new());
        }

        let mut text = String::new();
        loop {
            let Some(c) = self.bump() else {
                self.error(line, column, "unterminated string literal");
                return None;
            };
            if c == quote {
                if !triple {
                    return Some(text);
                }
                if self.peek() == Some(quote) && self.peek_second() == Some(quote) {
                    self.bump();
                    self.bump();
                    return Some(text);
                }
                text.push(c);
                continue;
            }
            if c == '\n' && !triple {
                self.error(line, column, "unterminated string literal");
                return None;
            }
            if c == '\\' && !raw {
                match self.escape() {
                    Ok(decoded) => text.push(decoded),
                    Err(message) => {
                        let offset = self.offset();
                        let (line, column) = (self.line, self.column(offset));
                        self.error(line, column, message);
                    }
                }
                continue;
            }
            text.push(c);
        }
    }

    fn escape(&mut self) -> Result<char, String> {
        let Some(c) = self.bump() else {
            return Err("unterminated escape sequence".to_owned());
        };
        let decoded = match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            '0' => '\0',
            '\\' | '\'' | '"' | '`' | '?' => c,
            'x' | 'X' => return self.hex_escape(2),
            'u' => return self.hex_escape(4),
            'U' => return self.hex_escape(8),
            other => return Err(format!("invalid escape sequence '\\{other}'")),
        };
        Ok(decoded)
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, String> {
        let mut code = 0u32;
        for _ in 0..digits {
            let digit = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| "invalid hex escape sequence".to_owned())?;
            self.bump();
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| format!("invalid unicode code point {code:#x}"))
    }

    fn number(&mut self, start: usize) -> Option<TokenKind> {
        let source = self.source;
        let line = self.line;
        let column = self.column(start);
        let first = &source[start..self.offset()];

        if first == "0" && matches!(self.peek(), Some('x' | 'X')) {
            self.bump();
            let digits_start = self.offset();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = source[digits_start..self.offset()].to_owned();
            let unsigned = self.eat('u') || self.eat('U');
            let parsed = if unsigned {
                u64::from_str_radix(&digits, 16).map(TokenKind::Uint).ok()
            } else {
                i64::from_str_radix(&digits, 16).map(TokenKind::Int).ok()
            };
            if parsed.is_none() {
                self.error(line, column, format!("invalid hex literal '0x{digits}'"));
            }
            return parsed;
        }

        let mut float = first == ".";
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if !float
            && self.peek() == Some('.')
            && self.peek_second().is_some_and(|c| c.is_ascii_digit())
        {
            float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        } else if float {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut ahead = self.chars.clone();
            ahead.next();
            let next = ahead.next().map(|(_, c)| c);
            let after_sign = match next {
                Some('+' | '-') => ahead.next().map(|(_, c)| c),
                other => other,
            };
            if after_sign.is_some_and(|c| c.is_ascii_digit()) {
                float = true;
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = &source[start..self.offset()];
        if float {
            return match text.parse::<f64>() {
                Ok(value) => Some(TokenKind::Float(value)),
                Err(_) => {
                    let message = format!("invalid float literal '{text}'");
                    self.error(line, column, message);
                    None
                }
            };
        }

        let text = text.to_owned();
        if self.eat('u') || self.eat('U') {
            return match text.parse::<u64>() {
                Ok(value) => Some(TokenKind::Uint(value)),
                Err(_) => {
                    self.error(line, column, format!("invalid uint literal '{text}u'"));
                    None
                }
            };
        }
        match text.parse::<i64>() {
            Ok(value) => Some(TokenKind::Int(value)),
            Err(_) => {
                self.error(line, column, format!("invalid int literal '{text}'"));
                None
            }
        }
    }
}

/// 토큰 목록 위를 움직이는 커서
///
/// 괄호 안(`nesting > 0`)에서는 줄바꿈 토큰을 건너뜁니다.
#[derive(Debug)]
pub struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    nesting: usize,
    last_end: usize,
}

impl<'t> Cursor<'t> {
    /// `tokens`는 [`tokenize`]의 결과처럼 [`TokenKind::Eof`]로 끝나야 합니다.
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            last_end: 0,
        }
    }

    fn skip_nested_eol(&mut self) {
        if self.nesting > 0 {
            self.skip_eol();
        }
    }

    /// 줄바꿈 토큰을 모두 건너뜁니다.
    pub fn skip_eol(&mut self) {
        while self.pos + 1 < self.tokens.len() && self.tokens[self.pos].kind == TokenKind::Eol {
            self.pos += 1;
        }
    }

    pub fn peek(&mut self) -> &'t Token {
        self.skip_nested_eol();
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    pub fn peek_kind(&mut self) -> &'t TokenKind {
        &self.peek().kind
    }

    /// 현재 토큰을 소비하고 반환합니다. EOF에서는 움직이지 않습니다.
    pub fn next(&mut self) -> &'t Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
            self.last_end = token.end;
        }
        token
    }

    /// 현재 토큰이 `kind`이면 소비합니다.
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.next();
            true
        } else {
            false
        }
    }

    /// `kind`를 요구합니다. 아니면 그 위치의 진단을 반환합니다.
    pub fn expect(&mut self, kind: &TokenKind) -> Result<&'t Token, Diagnostic> {
        let token = self.peek();
        if &token.kind == kind {
            Ok(self.next())
        } else {
            Err(unexpected(token, &format!("expecting {kind}")))
        }
    }

    /// 줄바꿈 뒤의 첫 토큰이 `kind`이면 줄바꿈과 함께 소비합니다.
    /// 아니면 위치를 바꾸지 않습니다.
    pub fn eat_across_eol(&mut self, kind: &TokenKind) -> bool {
        let mut pos = self.pos;
        while pos + 1 < self.tokens.len() && self.tokens[pos].kind == TokenKind::Eol {
            pos += 1;
        }
        if self.tokens.get(pos).is_some_and(|token| &token.kind == kind) {
            self.pos = pos;
            self.next();
            true
        } else {
            false
        }
    }

    /// 마지막으로 소비한 토큰의 끝 바이트 위치
    pub fn last_end(&self) -> usize {
        self.last_end
    }

    pub fn enter(&mut self) {
        self.nesting += 1;
    }

    pub fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    /// 오류 복구 시 괄호 중첩 상태를 버립니다.
    pub fn reset_nesting(&mut self) {
        self.nesting = 0;
    }
}

/// 예상하지 못한 토큰에 대한 진단을 만듭니다.
pub fn unexpected(token: &Token, expecting: &str) -> Diagnostic {
    Diagnostic::new(
        token.line,
        token.column,
        format!("unexpected {}, {expecting}", token.kind),
    )
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '@'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword_or_ident(word: &str) -> TokenKind {
    match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "set" => TokenKind::Set,
        "unset" => TokenKind::Unset,
        "in" => TokenKind::In,
        other => TokenKind::Ident(other.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_statement() {
        assert_eq!(
            kinds("set a[b] = 1;"),
            vec![
                TokenKind::Set,
                TokenKind::Ident("a".to_owned()),
                TokenKind::LBracket,
                TokenKind::Ident("b".to_owned()),
                TokenKind::RBracket,
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_operators() {
        assert_eq!(
            kinds("== != <= >= && || ! < >"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_numbers() {
        assert_eq!(
            kinds("42 42u 0x1F 1.5 .5 1e3 2.5e-1"),
            vec![
                TokenKind::Int(42),
                TokenKind::Uint(42),
                TokenKind::Int(31),
                TokenKind::Float(1.5),
                TokenKind::Float(0.5),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.25),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn member_access_on_integer_is_not_a_float() {
        assert_eq!(
            kinds("1.size"),
            vec![
                TokenKind::Int(1),
                TokenKind::Dot,
                TokenKind::Ident("size".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_string_forms() {
        assert_eq!(
            kinds(r#""a\tb" 'it\'s' r"\d+" b"\x41" """multi"line""""#),
            vec![
                TokenKind::String("a\tb".to_owned()),
                TokenKind::String("it's".to_owned()),
                TokenKind::String("\\d+".to_owned()),
                TokenKind::Bytes(b"A".to_vec()),
                TokenKind::String("multi\"line".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_newlines_kept() {
        assert_eq!(
            kinds("add_tag // trailing\nunset x"),
            vec![
                TokenKind::Ident("add_tag".to_owned()),
                TokenKind::Eol,
                TokenKind::Unset,
                TokenKind::Ident("x".to_owned()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn records_positions() {
        let (tokens, _) = tokenize("set a = 1\n  unset b");
        let unset = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Unset)
            .unwrap();
        assert_eq!((unset.line, unset.column), (2, 2));
        assert_eq!(&"set a = 1\n  unset b"[unset.start..unset.end], "unset");
    }

    #[test]
    fn reports_unknown_characters() {
        let (tokens, errors) = tokenize("set a = 1 $");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].column, 10);
        assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
    }

    #[test]
    fn reports_unterminated_string() {
        let (_, errors) = tokenize("set a = \"open\nset b = 1");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
    }

    #[test]
    fn metadata_identifiers_are_allowed() {
        assert_eq!(
            kinds("@metadata"),
            vec![TokenKind::Ident("@metadata".to_owned()), TokenKind::Eof]
        );
    }
}
