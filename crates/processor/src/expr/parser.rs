//! 표현식 파서 (Pratt)
//!
//! 스크립트 파서와 토큰 커서를 공유하므로, 표현식은 그것을 끝맺을 수 없는
//! 토큰(`;`, `,`, `{`, 괄호 밖의 줄바꿈 등)을 만나면 멈춥니다.

use logforge_core::Value;

use super::ast::{BinaryOp, EVENT_VARIABLE, Expr, Function, UnaryOp};
use crate::error::Diagnostic;
use crate::script::lexer::{Cursor, Token, TokenKind, unexpected};

/// 연산자 결합 강도 (클수록 강함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Relation,
    Additive,
    Multiplicative,
}

fn infix(kind: &TokenKind) -> Option<(BinaryOp, Precedence)> {
    let entry = match kind {
        TokenKind::OrOr => (BinaryOp::Or, Precedence::Or),
        TokenKind::AndAnd => (BinaryOp::And, Precedence::And),
        TokenKind::EqEq => (BinaryOp::Eq, Precedence::Relation),
        TokenKind::NotEq => (BinaryOp::Ne, Precedence::Relation),
        TokenKind::Lt => (BinaryOp::Lt, Precedence::Relation),
        TokenKind::Le => (BinaryOp::Le, Precedence::Relation),
        TokenKind::Gt => (BinaryOp::Gt, Precedence::Relation),
        TokenKind::Ge => (BinaryOp::Ge, Precedence::Relation),
        TokenKind::In => (BinaryOp::In, Precedence::Relation),
        TokenKind::Plus => (BinaryOp::Add, Precedence::Additive),
        TokenKind::Minus => (BinaryOp::Sub, Precedence::Additive),
        TokenKind::Star => (BinaryOp::Mul, Precedence::Multiplicative),
        TokenKind::Slash => (BinaryOp::Div, Precedence::Multiplicative),
        TokenKind::Percent => (BinaryOp::Rem, Precedence::Multiplicative),
        _ => return None,
    };
    Some(entry)
}

/// 커서 위치에서 표현식 하나를 파싱합니다.
pub fn parse_expr(cursor: &mut Cursor<'_>) -> Result<Expr, Diagnostic> {
    parse_conditional(cursor)
}

fn parse_conditional(cursor: &mut Cursor<'_>) -> Result<Expr, Diagnostic> {
    let condition = parse_binary(cursor, Precedence::Lowest)?;
    if !cursor.eat(&TokenKind::Question) {
        return Ok(condition);
    }
    cursor.skip_eol();
    let then = parse_conditional(cursor)?;
    cursor.skip_eol();
    cursor.expect(&TokenKind::Colon)?;
    cursor.skip_eol();
    let otherwise = parse_conditional(cursor)?;
    Ok(Expr::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

fn parse_binary(cursor: &mut Cursor<'_>, min: Precedence) -> Result<Expr, Diagnostic> {
    let mut lhs = parse_unary(cursor)?;
    loop {
        let Some((op, precedence)) = infix(cursor.peek_kind()) else {
            return Ok(lhs);
        };
        if precedence <= min {
            return Ok(lhs);
        }
        cursor.next();
        cursor.skip_eol();
        let rhs = parse_binary(cursor, precedence)?;
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
    }
}

fn parse_unary(cursor: &mut Cursor<'_>) -> Result<Expr, Diagnostic> {
    let op = match cursor.peek_kind() {
        TokenKind::Bang => UnaryOp::Not,
        TokenKind::Minus => UnaryOp::Negate,
        _ => return parse_member(cursor),
    };
    cursor.next();

    // 음수 리터럴은 바로 상수로 만듭니다.
    if op == UnaryOp::Negate {
        match cursor.peek_kind() {
            TokenKind::Int(_) | TokenKind::Float(_) => {
                let token = cursor.next();
                let literal = match token.kind {
                    TokenKind::Int(value) => Value::Int(-value),
                    TokenKind::Float(value) => Value::Float(-value),
                    _ => unreachable!("guarded by peek"),
                };
                return parse_member_tail(cursor, Expr::Literal(literal));
            }
            _ => {}
        }
    }

    let operand = parse_unary(cursor)?;
    Ok(Expr::Unary {
        op,
        operand: Box::new(operand),
    })
}

fn parse_member(cursor: &mut Cursor<'_>) -> Result<Expr, Diagnostic> {
    let primary = parse_primary(cursor)?;
    parse_member_tail(cursor, primary)
}

fn parse_member_tail(cursor: &mut Cursor<'_>, mut operand: Expr) -> Result<Expr, Diagnostic> {
    loop {
        match cursor.peek_kind() {
            TokenKind::Dot => {
                cursor.next();
                let token = cursor.next();
                let TokenKind::Ident(name) = &token.kind else {
                    return Err(unexpected(token, "expecting field name"));
                };
                if cursor.peek_kind() == &TokenKind::LParen {
                    operand = parse_member_call(cursor, token, operand, name)?;
                } else {
                    operand = Expr::Select {
                        operand: Box::new(operand),
                        field: name.clone(),
                    };
                }
            }
            TokenKind::LBracket => {
                cursor.next();
                cursor.enter();
                let index = parse_expr(cursor);
                let close = index.and_then(|index| {
                    cursor.expect(&TokenKind::RBracket)?;
                    Ok(index)
                });
                cursor.leave();
                operand = Expr::Index {
                    operand: Box::new(operand),
                    index: Box::new(close?),
                };
            }
            _ => return Ok(operand),
        }
    }
}

fn parse_member_call(
    cursor: &mut Cursor<'_>,
    token: &Token,
    operand: Expr,
    name: &str,
) -> Result<Expr, Diagnostic> {
    // base64.encode(x) 처럼 네임스페이스가 붙은 전역 함수
    if let Expr::Ident(namespace) = &operand {
        if Function::is_namespace(namespace) {
            let qualified = format!("{namespace}.{name}");
            let args = parse_arguments(cursor)?;
            return build_call(token, &qualified, args, false);
        }
    }

    let mut args = vec![operand];
    args.extend(parse_arguments(cursor)?);
    build_call(token, name, args, true)
}

fn build_call(
    token: &Token,
    name: &str,
    args: Vec<Expr>,
    receiver: bool,
) -> Result<Expr, Diagnostic> {
    let function = Function::lookup(name).ok_or_else(|| {
        Diagnostic::new(
            token.line,
            token.column,
            format!("undeclared reference to '{name}'"),
        )
    })?;
    if receiver && !function.allows_receiver() {
        return Err(Diagnostic::new(
            token.line,
            token.column,
            format!("function '{name}' cannot be called as a method"),
        ));
    }

    let (min, max) = function.arity();
    if args.len() < min || args.len() > max {
        return Err(Diagnostic::new(
            token.line,
            token.column,
            format!(
                "found no matching overload for '{name}' with {} argument(s)",
                args.len()
            ),
        ));
    }
    Ok(Expr::Call { function, args })
}

/// `(` 부터 `)` 까지의 인자 목록
fn parse_arguments(cursor: &mut Cursor<'_>) -> Result<Vec<Expr>, Diagnostic> {
    cursor.expect(&TokenKind::LParen)?;
    cursor.enter();
    let result = parse_sequence(cursor, &TokenKind::RParen, parse_expr);
    cursor.leave();
    result
}

/// 쉼표로 구분된 항목을 닫는 토큰까지 읽습니다. 끝의 쉼표는 허용합니다.
fn parse_sequence<T>(
    cursor: &mut Cursor<'_>,
    close: &TokenKind,
    mut item: impl FnMut(&mut Cursor<'_>) -> Result<T, Diagnostic>,
) -> Result<Vec<T>, Diagnostic> {
    let mut items = Vec::new();
    loop {
        if cursor.eat(close) {
            return Ok(items);
        }
        items.push(item(cursor)?);
        if cursor.eat(close) {
            return Ok(items);
        }
        let token = cursor.peek();
        if !cursor.eat(&TokenKind::Comma) {
            return Err(unexpected(token, &format!("expecting ',' or {close}")));
        }
    }
}

fn parse_primary(cursor: &mut Cursor<'_>) -> Result<Expr, Diagnostic> {
    let token = cursor.next();
    let expr = match &token.kind {
        TokenKind::Int(value) => Expr::Literal(Value::Int(*value)),
        TokenKind::Uint(value) => Expr::Literal(Value::Uint(*value)),
        TokenKind::Float(value) => Expr::Literal(Value::Float(*value)),
        TokenKind::String(value) => Expr::Literal(Value::String(value.clone())),
        TokenKind::Bytes(value) => Expr::Literal(Value::Bytes(value.clone())),
        TokenKind::True => Expr::Literal(Value::Bool(true)),
        TokenKind::False => Expr::Literal(Value::Bool(false)),
        TokenKind::Null => Expr::Literal(Value::Null),
        TokenKind::LParen => {
            cursor.enter();
            let inner = parse_expr(cursor).and_then(|inner| {
                cursor.expect(&TokenKind::RParen)?;
                Ok(inner)
            });
            cursor.leave();
            inner?
        }
        TokenKind::LBracket => {
            cursor.enter();
            let items = parse_sequence(cursor, &TokenKind::RBracket, parse_expr);
            cursor.leave();
            Expr::List(items?)
        }
        TokenKind::LBrace => {
            cursor.enter();
            let entries = parse_sequence(cursor, &TokenKind::RBrace, |cursor| {
                let key = parse_expr(cursor)?;
                cursor.expect(&TokenKind::Colon)?;
                let value = parse_expr(cursor)?;
                Ok((key, value))
            });
            cursor.leave();
            Expr::Map(entries?)
        }
        TokenKind::Ident(name) if cursor.peek_kind() == &TokenKind::LParen => {
            if name == "has" {
                return parse_has(cursor, token);
            }
            let args = parse_arguments(cursor)?;
            build_call(token, name, args, false)?
        }
        TokenKind::Ident(name) if name == EVENT_VARIABLE => Expr::Ident(name.clone()),
        TokenKind::Ident(name)
            if Function::is_namespace(name) && cursor.peek_kind() == &TokenKind::Dot =>
        {
            Expr::Ident(name.clone())
        }
        TokenKind::Ident(name) => {
            return Err(Diagnostic::new(
                token.line,
                token.column,
                format!("undeclared reference to '{name}'"),
            ));
        }
        _ => return Err(unexpected(token, "expecting expression")),
    };
    Ok(expr)
}

/// `has(a.b)` 매크로: 인자는 반드시 필드 선택이어야 합니다.
fn parse_has(cursor: &mut Cursor<'_>, token: &Token) -> Result<Expr, Diagnostic> {
    let mut args = parse_arguments(cursor)?;
    let invalid = || {
        Diagnostic::new(
            token.line,
            token.column,
            "invalid argument to has() macro",
        )
    };
    if args.len() != 1 {
        return Err(invalid());
    }
    match args.pop() {
        Some(Expr::Select { operand, field }) => Ok(Expr::Has { operand, field }),
        _ => Err(invalid()),
    }
}
