//! 표현식 언어
//!
//! CEL 호환 문법의 표현식을 파싱하고 이벤트 데이터(`event` 변수)에 대해
//! 평가합니다. 스크립트의 조건문과 액션 인자, 파이프라인의 `condition_expr`가
//! 이 언어를 씁니다.
//!
//! `event`를 참조하지 않는 하위 표현식은 파싱 직후 상수로 접힙니다. 접는 중
//! 에러가 나는 상수 표현식은 그대로 남겨 두어 이벤트마다 에러로 보고됩니다.

pub mod ast;
mod eval;
mod functions;
mod parser;

use logforge_core::metrics as m;
use logforge_core::{Event, Map, Value};

use crate::error::ProcessorError;
use crate::script::lexer::{Cursor, TokenKind, tokenize, unexpected};

pub use ast::Expr;
pub(crate) use eval::values_equal;
pub(crate) use parser::parse_expr;

use ast::Function;

/// 표현식 평가 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// 맵에 없는 키
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    /// 피연산자 타입에 맞는 연산이 없음
    #[error("no such overload: {operation}")]
    NoSuchOverload { operation: String },

    /// 목록 범위를 벗어난 색인
    #[error("index out of range: {index}")]
    IndexOutOfRange { index: i64 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("modulus by zero")]
    ModulusByZero,

    /// 정수 오버플로
    #[error("integer overflow")]
    Overflow,

    /// 내장 함수 실패
    #[error("{function}: {reason}")]
    Function {
        function: &'static str,
        reason: String,
    },
}

impl EvalError {
    pub(crate) fn no_overload(operation: impl Into<String>) -> Self {
        Self::NoSuchOverload {
            operation: operation.into(),
        }
    }
}

/// 컴파일된 표현식
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// 독립된 표현식 문자열을 컴파일합니다 (`condition_expr` 등).
    pub fn parse(source: &str) -> Result<Self, ProcessorError> {
        let (tokens, mut errors) = tokenize(source);
        if errors.is_empty() {
            let mut cursor = Cursor::new(&tokens);
            cursor.skip_eol();
            match parse_expr(&mut cursor) {
                Ok(root) => {
                    cursor.skip_eol();
                    let rest = cursor.peek();
                    if rest.kind == TokenKind::Eof {
                        return Self::build(source.trim().to_owned(), root)
                            .map_err(|message| ProcessorError::compile(1, 0, message));
                    }
                    errors.push(unexpected(rest, "expecting end of expression"));
                }
                Err(diagnostic) => errors.push(diagnostic),
            }
        }
        Err(ProcessorError::Compile { errors })
    }

    /// 파싱된 구문 트리로 표현식을 만들고 상수를 접습니다.
    pub(crate) fn build(source: String, root: Expr) -> Result<Self, String> {
        Ok(Self {
            source,
            root: fold(root)?,
        })
    }

    /// 상수 표현식
    pub fn literal(value: Value) -> Self {
        Self {
            source: value.to_json_string(),
            root: Expr::Literal(value),
        }
    }

    /// 원본 표현식 문자열
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 상수로 접혔다면 그 값
    pub fn as_literal(&self) -> Option<&Value> {
        self.root.as_literal()
    }

    pub fn is_literal(&self) -> bool {
        self.as_literal().is_some()
    }

    /// 데이터 맵에 대해 평가합니다.
    pub fn evaluate(&self, data: &Map) -> Result<Value, EvalError> {
        match &self.root {
            Expr::Literal(value) => Ok(value.clone()),
            root => eval::evaluate(root, data),
        }
    }

    /// 이벤트에 대해 평가합니다. 에러는 경고로 남기고 null로 취급합니다.
    pub fn value(&self, event: &Event) -> Value {
        match self.evaluate(event.data()) {
            Ok(value) => value,
            Err(e) => {
                metrics::counter!(m::PROCESSOR_EXPRESSION_FAILURES_TOTAL).increment(1);
                tracing::warn!(
                    expression = %self.source,
                    error = %e,
                    "failed to evaluate expression, treating as null"
                );
                Value::Null
            }
        }
    }

    /// 조건으로 평가합니다. `true`일 때만 참입니다.
    pub fn is_true(&self, event: &Event) -> bool {
        match self.value(event) {
            Value::Bool(b) => b,
            Value::Null => false,
            other => {
                tracing::warn!(
                    expression = %self.source,
                    kind = other.kind(),
                    "condition did not evaluate to a bool, treating as false"
                );
                false
            }
        }
    }
}

/// 상수 하위 표현식을 접고, 패턴이 상수인 `matches`의 정규식을 미리 컴파일합니다.
fn fold(expr: Expr) -> Result<Expr, String> {
    let expr = fold_children(expr)?;
    if !matches!(expr, Expr::Literal(_)) && expr.is_constant() {
        if let Ok(value) = eval::evaluate(&expr, &Map::new()) {
            return Ok(Expr::Literal(value));
        }
    }

    match expr {
        Expr::Call {
            function: Function::Matches,
            mut args,
        } if matches!(args.get(1), Some(Expr::Literal(Value::String(_)))) => {
            let Some(Expr::Literal(Value::String(pattern))) = args.pop() else {
                unreachable!("guarded by match arm");
            };
            let regex = regex::Regex::new(&pattern)
                .map_err(|e| format!("invalid regular expression '{pattern}': {e}"))?;
            let target = args.pop().unwrap_or(Expr::Literal(Value::Null));
            Ok(Expr::Matches {
                target: Box::new(target),
                regex,
            })
        }
        other => Ok(other),
    }
}

fn fold_children(expr: Expr) -> Result<Expr, String> {
    let boxed = |expr: Box<Expr>| fold(*expr).map(Box::new);
    let folded = match expr {
        Expr::List(items) => Expr::List(items.into_iter().map(fold).collect::<Result<_, _>>()?),
        Expr::Map(entries) => Expr::Map(
            entries
                .into_iter()
                .map(|(key, value)| Ok((fold(key)?, fold(value)?)))
                .collect::<Result<_, String>>()?,
        ),
        Expr::Select { operand, field } => Expr::Select {
            operand: boxed(operand)?,
            field,
        },
        Expr::Index { operand, index } => Expr::Index {
            operand: boxed(operand)?,
            index: boxed(index)?,
        },
        Expr::Has { operand, field } => Expr::Has {
            operand: boxed(operand)?,
            field,
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: boxed(operand)?,
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: boxed(lhs)?,
            rhs: boxed(rhs)?,
        },
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => Expr::Conditional {
            condition: boxed(condition)?,
            then: boxed(then)?,
            otherwise: boxed(otherwise)?,
        },
        Expr::Call { function, args } => Expr::Call {
            function,
            args: args.into_iter().map(fold).collect::<Result<_, _>>()?,
        },
        leaf @ (Expr::Literal(_) | Expr::Ident(_) | Expr::Matches { .. }) => leaf,
    };
    Ok(folded)
}
