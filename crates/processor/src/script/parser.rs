//! 스크립트 파서
//!
//! 문법:
//!
//! ```text
//! program   := line*
//! line      := statement (';' | EOL | '}' | EOF) | if
//! statement := 'set' path '=' expr | 'unset' path | IDENT [arg (',' arg)*]
//! arg       := IDENT '=' expr
//! if        := 'if' '(' expr ')' block ('else' 'if' '(' expr ')' block)* ('else' block)?
//! block     := '{' line* '}'
//! path      := (IDENT | '[' key ']') ('[' key ']')*
//! ```
//!
//! 오류가 나면 진단을 남기고 다음 `;` 또는 줄바꿈까지 건너뛴 뒤 계속 파싱하므로
//! 한 번에 여러 오류를 보고할 수 있습니다.

use crate::error::{Diagnostic, ProcessorError};
use crate::expr::{Expression, parse_expr};

use super::ast::{Argument, Branch, Position, Script, Statement};
use super::lexer::{Cursor, Token, TokenKind, tokenize, unexpected};

/// 스크립트 원본을 구문 트리로 파싱합니다.
///
/// # Errors
///
/// 어휘/구문 오류가 하나라도 있으면 모든 진단을 담은
/// [`ProcessorError::Compile`]을 반환합니다.
pub fn parse_script(source: &str) -> Result<Script, ProcessorError> {
    let (tokens, mut errors) = tokenize(source);
    let mut parser = Parser {
        source,
        cursor: Cursor::new(&tokens),
        errors: Vec::new(),
    };
    let statements = parser.lines(false);
    errors.append(&mut parser.errors);

    if errors.is_empty() {
        Ok(Script { statements })
    } else {
        errors.sort_by_key(|d| (d.line, d.column));
        Err(ProcessorError::Compile { errors })
    }
}

struct Parser<'s, 't> {
    source: &'s str,
    cursor: Cursor<'t>,
    errors: Vec<Diagnostic>,
}

impl<'t> Parser<'_, 't> {
    /// `}` 또는 EOF까지 줄을 읽습니다. 닫는 괄호는 소비하지 않습니다.
    fn lines(&mut self, in_block: bool) -> Vec<Statement> {
        let mut statements = Vec::new();
        loop {
            match self.cursor.peek_kind() {
                TokenKind::Eol | TokenKind::Semicolon => {
                    self.cursor.next();
                }
                TokenKind::Eof => break,
                TokenKind::RBrace if in_block => break,
                TokenKind::RBrace => {
                    let token = self.cursor.next();
                    self.errors.push(unexpected(token, "expecting statement"));
                }
                _ => match self.line() {
                    Ok(statement) => statements.push(statement),
                    Err(diagnostic) => {
                        self.errors.push(diagnostic);
                        self.recover();
                    }
                },
            }
        }
        statements
    }

    fn line(&mut self) -> Result<Statement, Diagnostic> {
        let token = self.cursor.peek();
        let position = position(token);
        let statement = match &token.kind {
            TokenKind::If => return self.if_statement(position),
            TokenKind::Set => {
                self.cursor.next();
                let path = self.path()?;
                self.cursor.expect(&TokenKind::Assign)?;
                self.cursor.skip_eol();
                let value = self.expression()?;
                Statement::Set {
                    path,
                    value,
                    position,
                }
            }
            TokenKind::Unset => {
                self.cursor.next();
                let path = self.path()?;
                Statement::Unset { path, position }
            }
            TokenKind::Ident(name) => {
                self.cursor.next();
                let arguments = self.arguments()?;
                Statement::Action {
                    name: name.clone(),
                    arguments,
                    position,
                }
            }
            _ => return Err(unexpected(token, "expecting statement")),
        };
        self.terminator()?;
        Ok(statement)
    }

    fn terminator(&mut self) -> Result<(), Diagnostic> {
        let token = self.cursor.peek();
        match token.kind {
            TokenKind::Semicolon | TokenKind::Eol => {
                self.cursor.next();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(unexpected(token, "expecting ';' or end of line")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Argument>, Diagnostic> {
        let mut arguments: Vec<Argument> = Vec::new();
        if !matches!(self.cursor.peek_kind(), TokenKind::Ident(_)) {
            return Ok(arguments);
        }
        loop {
            let token = self.cursor.next();
            let TokenKind::Ident(name) = &token.kind else {
                return Err(unexpected(token, "expecting argument name"));
            };
            if arguments.iter().any(|argument| &argument.name == name) {
                return Err(Diagnostic::new(
                    token.line,
                    token.column,
                    format!("duplicate argument: {name}"),
                ));
            }
            self.cursor.expect(&TokenKind::Assign)?;
            self.cursor.skip_eol();
            let value = self.expression()?;
            arguments.push(Argument {
                name: name.clone(),
                value,
                position: position(token),
            });
            if !self.cursor.eat(&TokenKind::Comma) {
                return Ok(arguments);
            }
            self.cursor.skip_eol();
        }
    }

    fn if_statement(&mut self, position: Position) -> Result<Statement, Diagnostic> {
        self.cursor.expect(&TokenKind::If)?;
        let mut branches = vec![self.branch()?];
        let mut otherwise = None;
        while self.cursor.eat_across_eol(&TokenKind::Else) {
            if self.cursor.eat(&TokenKind::If) {
                branches.push(self.branch()?);
            } else {
                otherwise = Some(self.block()?);
                break;
            }
        }
        Ok(Statement::If {
            branches,
            otherwise,
            position,
        })
    }

    fn branch(&mut self) -> Result<Branch, Diagnostic> {
        self.cursor.expect(&TokenKind::LParen)?;
        self.cursor.enter();
        let condition = self.condition();
        self.cursor.leave();
        let condition = condition?;
        let body = self.block()?;
        Ok(Branch { condition, body })
    }

    fn condition(&mut self) -> Result<Expression, Diagnostic> {
        let condition = self.expression()?;
        self.cursor.expect(&TokenKind::RParen)?;
        Ok(condition)
    }

    fn block(&mut self) -> Result<Vec<Statement>, Diagnostic> {
        self.cursor.skip_eol();
        self.cursor.expect(&TokenKind::LBrace)?;
        let body = self.lines(true);
        self.cursor.expect(&TokenKind::RBrace)?;
        Ok(body)
    }

    /// 표현식 하나를 파싱하고 원본 구간을 붙여 컴파일합니다.
    fn expression(&mut self) -> Result<Expression, Diagnostic> {
        let first = self.cursor.peek();
        let expr = parse_expr(&mut self.cursor)?;
        let end = self.cursor.last_end().max(first.start);
        let source = self.source[first.start..end].to_owned();
        Expression::build(source, expr)
            .map_err(|message| Diagnostic::new(first.line, first.column, message))
    }

    fn path(&mut self) -> Result<String, Diagnostic> {
        let token = self.cursor.peek();
        let mut path = match &token.kind {
            TokenKind::Ident(name) => {
                self.cursor.next();
                name.clone()
            }
            TokenKind::LBracket => String::new(),
            _ => return Err(unexpected(token, "expecting field path")),
        };
        while self.cursor.peek_kind() == &TokenKind::LBracket {
            self.cursor.next();
            let key = self.cursor.next();
            let segment = match &key.kind {
                TokenKind::Ident(name) | TokenKind::String(name) => name.clone(),
                TokenKind::Int(index) => index.to_string(),
                TokenKind::Set => "set".to_owned(),
                TokenKind::Unset => "unset".to_owned(),
                _ => return Err(unexpected(key, "expecting path key")),
            };
            if segment.is_empty() || segment.contains(['[', ']']) {
                return Err(Diagnostic::new(
                    key.line,
                    key.column,
                    format!("invalid path key '{segment}'"),
                ));
            }
            self.cursor.expect(&TokenKind::RBracket)?;
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        }
        Ok(path)
    }

    /// 다음 문장 경계까지 건너뜁니다.
    fn recover(&mut self) {
        self.cursor.reset_nesting();
        loop {
            match self.cursor.peek_kind() {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semicolon | TokenKind::Eol => {
                    self.cursor.next();
                    return;
                }
                _ => {
                    self.cursor.next();
                }
            }
        }
    }
}

fn position(token: &Token) -> Position {
    Position {
        line: token.line,
        column: token.column,
    }
}
