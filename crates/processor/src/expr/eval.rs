//! 표현식 평가
//!
//! 필드 선택과 색인은 이벤트 데이터를 빌려서 따라가며, 최종 결과만 복제합니다.

use std::borrow::Cow;
use std::cmp::Ordering;

use logforge_core::{Map, Value};

use super::EvalError;
use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions;

/// 선택/색인의 대상. 변수 `event`는 값이 아니라 데이터 맵 자체입니다.
enum Scope<'a> {
    Root(&'a Map),
    Value(Cow<'a, Value>),
}

/// 표현식을 `event` 데이터에 대해 평가합니다.
pub fn evaluate(expr: &Expr, data: &Map) -> Result<Value, EvalError> {
    eval(expr, data).map(Cow::into_owned)
}

fn eval<'a>(expr: &'a Expr, data: &'a Map) -> Result<Cow<'a, Value>, EvalError> {
    let value = match expr {
        Expr::Literal(value) => return Ok(Cow::Borrowed(value)),
        Expr::Ident(_) => Value::Map(data.clone()),
        Expr::Select { operand, field } => return select(scope(operand, data)?, field),
        Expr::Index { operand, index } => {
            let target = scope(operand, data)?;
            let index = eval(index, data)?;
            return lookup_index(target, &index);
        }
        Expr::Has { operand, field } => Value::Bool(has(operand, field, data)),
        Expr::Unary { op, operand } => unary(*op, &*eval(operand, data)?)?,
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => logical(false, lhs, rhs, data)?,
        Expr::Binary {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => logical(true, lhs, rhs, data)?,
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, data)?;
            let rhs = eval(rhs, data)?;
            binary(*op, &lhs, &rhs)?
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            return match eval(condition, data)?.as_ref() {
                Value::Bool(true) => eval(then, data),
                Value::Bool(false) => eval(otherwise, data),
                other => Err(EvalError::no_overload(format!(
                    "conditional on {}",
                    other.kind()
                ))),
            };
        }
        Expr::List(items) => Value::List(
            items
                .iter()
                .map(|item| evaluate(item, data))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match evaluate(key, data)? {
                    Value::String(key) => key,
                    other => {
                        return Err(EvalError::no_overload(format!(
                            "map key of type {}",
                            other.kind()
                        )));
                    }
                };
                map.insert(key, evaluate(value, data)?);
            }
            Value::Map(map)
        }
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, data))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(*function, args)?
        }
        Expr::Matches { target, regex } => match eval(target, data)?.as_ref() {
            Value::String(text) => Value::Bool(regex.is_match(text)),
            other => {
                return Err(EvalError::no_overload(format!(
                    "matches on {}",
                    other.kind()
                )));
            }
        },
    };
    Ok(Cow::Owned(value))
}

fn scope<'a>(expr: &'a Expr, data: &'a Map) -> Result<Scope<'a>, EvalError> {
    match expr {
        Expr::Ident(_) => Ok(Scope::Root(data)),
        other => eval(other, data).map(Scope::Value),
    }
}

fn select<'a>(target: Scope<'a>, key: &str) -> Result<Cow<'a, Value>, EvalError> {
    let missing = || EvalError::NoSuchKey {
        key: key.to_owned(),
    };
    match target {
        Scope::Root(map) => map.get(key).map(Cow::Borrowed).ok_or_else(missing),
        Scope::Value(Cow::Borrowed(Value::Map(map))) => {
            map.get(key).map(Cow::Borrowed).ok_or_else(missing)
        }
        Scope::Value(Cow::Owned(Value::Map(mut map))) => {
            map.swap_remove(key).map(Cow::Owned).ok_or_else(missing)
        }
        Scope::Value(other) => Err(EvalError::no_overload(format!(
            "field selection '{key}' on {}",
            other.kind()
        ))),
    }
}

fn lookup_index<'a>(target: Scope<'a>, index: &Value) -> Result<Cow<'a, Value>, EvalError> {
    if let Value::String(key) = index {
        return select(target, key);
    }

    let position = match index {
        Value::Int(i) => *i,
        Value::Uint(u) => i64::try_from(*u).unwrap_or(i64::MAX),
        Value::Float(f) if f.fract() == 0.0 => *f as i64,
        other => {
            return Err(EvalError::no_overload(format!(
                "index of type {}",
                other.kind()
            )));
        }
    };
    let out_of_range = || EvalError::IndexOutOfRange { index: position };
    let slot = usize::try_from(position).map_err(|_| out_of_range())?;

    match target {
        Scope::Value(Cow::Borrowed(Value::List(list))) => {
            list.get(slot).map(Cow::Borrowed).ok_or_else(out_of_range)
        }
        Scope::Value(Cow::Owned(Value::List(list))) => list
            .into_iter()
            .nth(slot)
            .map(Cow::Owned)
            .ok_or_else(out_of_range),
        Scope::Root(_) => Err(EvalError::no_overload("integer index on map")),
        Scope::Value(other) => Err(EvalError::no_overload(format!(
            "integer index on {}",
            other.kind()
        ))),
    }
}

/// `has(operand.field)`: 경로 중간이 없거나 맵이 아니면 `false`입니다.
fn has(operand: &Expr, field: &str, data: &Map) -> bool {
    match scope(operand, data) {
        Ok(Scope::Root(map)) => map.contains_key(field),
        Ok(Scope::Value(value)) => value
            .as_map()
            .is_some_and(|map| map.contains_key(field)),
        Err(_) => false,
    }
}

/// `&&`와 `||`
///
/// 한쪽이 결과를 확정하면(`&&`의 `false`, `||`의 `true`) 다른 쪽의 에러는
/// 무시됩니다. 왼쪽이 결과를 확정하면 오른쪽은 평가하지 않습니다.
fn logical(decisive: bool, lhs: &Expr, rhs: &Expr, data: &Map) -> Result<Value, EvalError> {
    let op = if decisive { "||" } else { "&&" };
    let as_bool = |value: Result<Cow<'_, Value>, EvalError>| {
        value.and_then(|value| match value.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::no_overload(format!("{op} on {}", other.kind()))),
        })
    };

    let left = as_bool(eval(lhs, data));
    if left == Ok(decisive) {
        return Ok(Value::Bool(decisive));
    }
    let right = as_bool(eval(rhs, data));
    match (left, right) {
        (_, Ok(b)) if b == decisive => Ok(Value::Bool(decisive)),
        (Err(e), _) | (_, Err(e)) => Err(e),
        (Ok(_), Ok(_)) => Ok(Value::Bool(!decisive)),
    }
}

fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, other) => Err(EvalError::no_overload(format!("!{}", other.kind()))),
        (UnaryOp::Negate, other) => Err(EvalError::no_overload(format!("-{}", other.kind()))),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(lhs, rhs).ok_or_else(|| mismatch(op, lhs, rhs))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => match rhs {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|item| values_equal(lhs, item)))),
            Value::Map(map) => match lhs {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Ok(Value::Bool(false)),
            },
            _ => Err(mismatch(op, lhs, rhs)),
        },
        BinaryOp::And | BinaryOp::Or => Err(mismatch(op, lhs, rhs)),
    }
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::no_overload(format!("{} {op} {}", lhs.kind(), rhs.kind()))
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let result = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let value = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem if b == 0 => return Err(EvalError::ModulusByZero),
                _ => a.checked_rem(b),
            };
            Value::Int(value.ok_or(EvalError::Overflow)?)
        }
        (Value::Uint(a), Value::Uint(b)) => {
            let (a, b) = (*a, *b);
            let value = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem if b == 0 => return Err(EvalError::ModulusByZero),
                _ => a.checked_rem(b),
            };
            Value::Uint(value.ok_or(EvalError::Overflow)?)
        }
        (Value::Float(a), Value::Float(b)) => match op {
            BinaryOp::Add => Value::Float(a + b),
            BinaryOp::Sub => Value::Float(a - b),
            BinaryOp::Mul => Value::Float(a * b),
            BinaryOp::Div => Value::Float(a / b),
            _ => return Err(mismatch(op, lhs, rhs)),
        },
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
            Value::String(format!("{a}{b}"))
        }
        (Value::Bytes(a), Value::Bytes(b)) if op == BinaryOp::Add => {
            Value::Bytes([a.as_slice(), b.as_slice()].concat())
        }
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            Value::List(a.iter().chain(b).cloned().collect())
        }
        _ => return Err(mismatch(op, lhs, rhs)),
    };
    Ok(result)
}

/// 숫자는 타입이 달라도 값으로 비교합니다.
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Uint(b)) => Some(match u64::try_from(*a) {
            Ok(a) => a.cmp(b),
            Err(_) => Ordering::Less,
        }),
        (Value::Uint(_), Value::Int(_)) => compare(rhs, lhs).map(Ordering::reverse),
        (Value::Int(_) | Value::Uint(_) | Value::Float(_), Value::Int(_) | Value::Uint(_) | Value::Float(_)) => {
            lhs.as_f64()?.partial_cmp(&rhs.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// 구조적 동등성. 숫자는 타입이 달라도 값이 같으면 같습니다.
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        (Value::Int(_) | Value::Uint(_) | Value::Float(_), Value::Int(_) | Value::Uint(_) | Value::Float(_)) => {
            compare(lhs, rhs) == Some(Ordering::Equal)
        }
        _ => lhs == rhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use chrono::{TimeZone, Utc};

    fn data() -> Map {
        let json = serde_json::json!({
            "level": "error",
            "response": 503,
            "ratio": 0.5,
            "user_agent": {"os": {"family": "Linux"}},
            "items": ["a", "b", "c"],
            "empty": null,
        });
        match Value::from(json) {
            Value::Map(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval_str(source: &str) -> Result<Value, EvalError> {
        Expression::parse(source).unwrap().evaluate(&data())
    }

    #[test]
    fn selects_nested_fields() {
        assert_eq!(eval_str("event.user_agent.os.family").unwrap(), Value::from("Linux"));
        assert_eq!(eval_str("event[\"user_agent\"][\"os\"].family").unwrap(), Value::from("Linux"));
        assert_eq!(eval_str("event.items[1]").unwrap(), Value::from("b"));
    }

    #[test]
    fn missing_key_is_an_error() {
        assert_eq!(
            eval_str("event.nope"),
            Err(EvalError::NoSuchKey { key: "nope".to_owned() })
        );
        assert!(matches!(eval_str("event.items[7]"), Err(EvalError::IndexOutOfRange { index: 7 })));
    }

    #[test]
    fn has_never_errors() {
        assert_eq!(eval_str("has(event.level)").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("has(event.nope)").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("has(event.nope.deeper)").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("has(event.level.deeper)").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("has(event.user_agent.os)").unwrap(), Value::Bool(true));
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval_str("event.response / 100 == 5").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("event.response >= 500 && event.ratio < 1.0").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("event.response == 503.0").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("\"a\" + \"b\"").unwrap(), Value::from("ab"));
        assert_eq!(eval_str("[1] + [2]").unwrap(), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn mixed_arithmetic_has_no_overload() {
        assert!(matches!(eval_str("event.response + 1.5"), Err(EvalError::NoSuchOverload { .. })));
    }

    #[test]
    fn integer_errors() {
        assert_eq!(eval_str("event.response / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval_str("event.response % 0"), Err(EvalError::ModulusByZero));
        assert_eq!(eval_str("9223372036854775807 + event.response"), Err(EvalError::Overflow));
    }

    #[test]
    fn logical_operators_absorb_errors() {
        assert_eq!(eval_str("event.nope == 1 && false").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("false && event.nope == 1").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("event.nope == 1 || true").unwrap(), Value::Bool(true));
        assert!(eval_str("event.nope == 1 || false").is_err());
        assert!(eval_str("true && event.nope == 1").is_err());
    }

    #[test]
    fn membership() {
        assert_eq!(eval_str("\"b\" in event.items").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("\"os\" in event.user_agent").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("\"level\" in event").unwrap(), Value::Bool(true));
    }

    #[test]
    fn conditional_requires_bool() {
        assert_eq!(
            eval_str("event.level == \"error\" ? \"high\" : \"low\"").unwrap(),
            Value::from("high")
        );
        assert!(eval_str("event.level ? 1 : 2").is_err());
    }

    #[test]
    fn builds_collections() {
        let value = eval_str("{\"level\": event.level, \"n\": [event.response]}").unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["level"], Value::from("error"));
        assert_eq!(map["n"], Value::List(vec![Value::Int(503)]));
    }

    #[test]
    fn compares_timestamps() {
        let mut map = Map::new();
        map.insert(
            "at".to_owned(),
            Value::Timestamp(Utc.with_ymd_and_hms(2020, 8, 3, 0, 0, 0).unwrap()),
        );
        let expr = Expression::parse("event.at > timestamp(\"2020-01-01T00:00:00Z\")").unwrap();
        assert_eq!(expr.evaluate(&map).unwrap(), Value::Bool(true));
    }

    #[test]
    fn equality_is_structural() {
        assert!(values_equal(&Value::Int(1), &Value::Uint(1)));
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::from("1"), &Value::Int(1)));
        assert_eq!(eval_str("event.items == [\"a\", \"b\", \"c\"]").unwrap(), Value::Bool(true));
    }
}
