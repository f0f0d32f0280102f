//! 내장 함수 구현
//!
//! 문자열 라이브러리, 타입 변환, base64/hex 인코딩, JSON 인코딩/디코딩.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use regex::Regex;

use logforge_core::event::format_timestamp;
use logforge_core::Value;

use super::EvalError;
use super::ast::Function;

/// 함수를 호출합니다. 인자 수는 파싱 시 검증되었습니다.
pub fn call(function: Function, args: Vec<Value>) -> Result<Value, EvalError> {
    let fail = |reason: String| EvalError::Function {
        function: function.name(),
        reason,
    };
    let mut args = args.into_iter();
    let target = args.next().unwrap_or_default();
    let rest: Vec<Value> = args.collect();

    let result = match function {
        Function::Size => size(&target).ok_or_else(|| mismatch(function, &target))?,
        Function::String => to_string(target).map_err(fail)?,
        Function::Int => to_int(&target).map_err(fail)?,
        Function::Uint => to_uint(&target).map_err(fail)?,
        Function::Double => to_double(&target).map_err(fail)?,
        Function::Bool => to_bool(&target).map_err(fail)?,
        Function::Bytes => match target {
            Value::Bytes(bytes) => Value::Bytes(bytes),
            Value::String(text) => Value::Bytes(text.into_bytes()),
            other => return Err(mismatch(function, &other)),
        },
        Function::Timestamp => to_timestamp(&target).map_err(fail)?,
        Function::Contains => {
            let (text, needle) = two_strings(function, &target, &rest[0])?;
            Value::Bool(text.contains(needle))
        }
        Function::StartsWith => {
            let (text, prefix) = two_strings(function, &target, &rest[0])?;
            Value::Bool(text.starts_with(prefix))
        }
        Function::EndsWith => {
            let (text, suffix) = two_strings(function, &target, &rest[0])?;
            Value::Bool(text.ends_with(suffix))
        }
        Function::Matches => {
            let (text, pattern) = two_strings(function, &target, &rest[0])?;
            let regex = Regex::new(pattern).map_err(|e| fail(e.to_string()))?;
            Value::Bool(regex.is_match(text))
        }
        Function::Replace => {
            let text = string_arg(function, &target)?;
            let from = string_arg(function, &rest[0])?;
            let to = string_arg(function, &rest[1])?;
            match rest.get(2) {
                None => Value::String(text.replace(from, to)),
                Some(limit) => {
                    let limit = int_arg(function, limit)?;
                    match usize::try_from(limit) {
                        Ok(limit) => Value::String(text.replacen(from, to, limit)),
                        Err(_) => Value::String(text.replace(from, to)),
                    }
                }
            }
        }
        Function::Trim => Value::String(string_arg(function, &target)?.trim().to_owned()),
        Function::LowerAscii => Value::String(string_arg(function, &target)?.to_ascii_lowercase()),
        Function::UpperAscii => Value::String(string_arg(function, &target)?.to_ascii_uppercase()),
        Function::Split => {
            let (text, separator) = two_strings(function, &target, &rest[0])?;
            let limit = rest.get(1).map(|n| int_arg(function, n)).transpose()?;
            let parts: Vec<String> = match limit.map(usize::try_from) {
                Some(Ok(0)) => Vec::new(),
                Some(Ok(n)) => text.splitn(n, separator).map(str::to_owned).collect(),
                _ => text.split(separator).map(str::to_owned).collect(),
            };
            Value::from(parts)
        }
        Function::Substring => {
            let text = string_arg(function, &target)?;
            let chars: Vec<char> = text.chars().collect();
            let start = int_arg(function, &rest[0])?;
            let end = match rest.get(1) {
                Some(end) => int_arg(function, end)?,
                None => chars.len() as i64,
            };
            if start < 0 || end < start || end > chars.len() as i64 {
                return Err(fail(format!(
                    "index out of range: [{start}, {end}) of length {}",
                    chars.len()
                )));
            }
            Value::String(chars[start as usize..end as usize].iter().collect())
        }
        Function::IndexOf => {
            let (text, needle) = two_strings(function, &target, &rest[0])?;
            Value::Int(char_index(text, text.find(needle)))
        }
        Function::LastIndexOf => {
            let (text, needle) = two_strings(function, &target, &rest[0])?;
            Value::Int(char_index(text, text.rfind(needle)))
        }
        Function::Join => {
            let items = target
                .as_string_list()
                .ok_or_else(|| mismatch(function, &target))?;
            let separator = match rest.first() {
                Some(separator) => string_arg(function, separator)?,
                None => "",
            };
            Value::String(items.join(separator))
        }
        Function::Base64Encode => Value::String(BASE64.encode(bytes_arg(function, &target)?)),
        Function::Base64Decode => {
            let encoded = bytes_arg(function, &target)?;
            Value::Bytes(BASE64.decode(encoded).map_err(|e| fail(e.to_string()))?)
        }
        Function::HexEncode => Value::String(hex::encode(bytes_arg(function, &target)?)),
        Function::HexDecode => {
            let encoded = bytes_arg(function, &target)?;
            Value::Bytes(hex::decode(encoded).map_err(|e| fail(e.to_string()))?)
        }
        Function::JsonEncode => {
            Value::Bytes(serde_json::to_vec(&target).map_err(|e| fail(e.to_string()))?)
        }
        Function::JsonDecode => {
            let raw = bytes_arg(function, &target)?;
            serde_json::from_slice::<Value>(raw).map_err(|e| fail(e.to_string()))?
        }
    };
    Ok(result)
}

fn mismatch(function: Function, value: &Value) -> EvalError {
    EvalError::no_overload(format!("{}({})", function.name(), value.kind()))
}

fn string_arg(function: Function, value: &Value) -> Result<&str, EvalError> {
    value.as_str().ok_or_else(|| mismatch(function, value))
}

fn two_strings<'a>(
    function: Function,
    lhs: &'a Value,
    rhs: &'a Value,
) -> Result<(&'a str, &'a str), EvalError> {
    Ok((string_arg(function, lhs)?, string_arg(function, rhs)?))
}

fn int_arg(function: Function, value: &Value) -> Result<i64, EvalError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(mismatch(function, other)),
    }
}

/// 인코딩 함수는 문자열도 UTF-8 바이트로 받아들입니다.
fn bytes_arg(function: Function, value: &Value) -> Result<&[u8], EvalError> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::String(text) => Ok(text.as_bytes()),
        other => Err(mismatch(function, other)),
    }
}

fn char_index(text: &str, byte_index: Option<usize>) -> i64 {
    match byte_index {
        Some(index) => text[..index].chars().count() as i64,
        None => -1,
    }
}

fn size(value: &Value) -> Option<Value> {
    let len = match value {
        Value::String(text) => text.chars().count(),
        Value::Bytes(bytes) => bytes.len(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        _ => return None,
    };
    Some(Value::Int(len as i64))
}

fn to_string(value: Value) -> Result<Value, String> {
    let text = match value {
        Value::String(text) => text,
        Value::Int(i) => i.to_string(),
        Value::Uint(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Timestamp(ts) => format_timestamp(&ts),
        Value::Bytes(bytes) => String::from_utf8(bytes).map_err(|e| e.to_string())?,
        other => return Err(format!("cannot convert {} to string", other.kind())),
    };
    Ok(Value::String(text))
}

fn to_int(value: &Value) -> Result<Value, String> {
    let int = match value {
        Value::Int(i) => *i,
        Value::Uint(u) => i64::try_from(*u).map_err(|_| "integer overflow".to_owned())?,
        Value::Float(f) => {
            if !f.is_finite() || *f <= i64::MIN as f64 || *f >= i64::MAX as f64 {
                return Err("integer overflow".to_owned());
            }
            f.trunc() as i64
        }
        Value::String(text) => text.parse().map_err(|e| format!("cannot parse '{text}' as int: {e}"))?,
        Value::Timestamp(ts) => ts.timestamp(),
        other => return Err(format!("cannot convert {} to int", other.kind())),
    };
    Ok(Value::Int(int))
}

fn to_uint(value: &Value) -> Result<Value, String> {
    let uint = match value {
        Value::Uint(u) => *u,
        Value::Int(i) => u64::try_from(*i).map_err(|_| "unsigned integer overflow".to_owned())?,
        Value::Float(f) => {
            if !f.is_finite() || *f < 0.0 || *f >= u64::MAX as f64 {
                return Err("unsigned integer overflow".to_owned());
            }
            f.trunc() as u64
        }
        Value::String(text) => text.parse().map_err(|e| format!("cannot parse '{text}' as uint: {e}"))?,
        other => return Err(format!("cannot convert {} to uint", other.kind())),
    };
    Ok(Value::Uint(uint))
}

fn to_double(value: &Value) -> Result<Value, String> {
    let double = match value {
        Value::Float(f) => *f,
        Value::Int(i) => *i as f64,
        Value::Uint(u) => *u as f64,
        Value::String(text) => text.parse().map_err(|e| format!("cannot parse '{text}' as double: {e}"))?,
        other => return Err(format!("cannot convert {} to double", other.kind())),
    };
    Ok(Value::Float(double))
}

fn to_bool(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(text) => match text.as_str() {
            "1" | "t" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot parse '{text}' as bool")),
        },
        other => Err(format!("cannot convert {} to bool", other.kind())),
    }
}

fn to_timestamp(value: &Value) -> Result<Value, String> {
    match value {
        Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|e| format!("cannot parse '{text}' as timestamp: {e}")),
        Value::Int(seconds) => DateTime::<Utc>::from_timestamp(*seconds, 0)
            .map(Value::Timestamp)
            .ok_or_else(|| format!("timestamp {seconds} out of range")),
        other => Err(format!("cannot convert {} to timestamp", other.kind())),
    }
}
