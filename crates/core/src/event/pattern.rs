//! `%{...}` 치환 패턴
//!
//! - `%{field[path]}`: 필드 값으로 치환. 문자열은 그대로, 그 외는 JSON.
//!   필드가 없으면 빈 문자열.
//! - `%{+2006.01.02}`: 이벤트 `@timestamp`를 UTC 기준 레이아웃으로 포맷.
//!
//! `%{`가 없는 패턴은 정적 문자열로 취급됩니다.

use super::{Event, Layout, Value};
use crate::error::EventError;

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Field(String),
    Timestamp(Layout),
}

/// 컴파일된 치환 패턴
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    parts: Option<Vec<Part>>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let parts = source.contains("%{").then(|| compile(&source));
        Self { source, parts }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 치환할 항목이 없는 패턴인지 여부
    pub fn is_static(&self) -> bool {
        self.parts.is_none()
    }

    /// 이벤트로 패턴을 채웁니다.
    pub fn format(&self, event: &Event) -> Result<String, EventError> {
        let Some(parts) = &self.parts else {
            return Ok(self.source.clone());
        };

        let mut out = String::with_capacity(self.source.len());
        for part in parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Timestamp(layout) => out.push_str(&layout.format(&event.timestamp())),
                Part::Field(path) => match event.resolve(path)? {
                    None => {}
                    Some(Value::String(text)) => out.push_str(text),
                    Some(other) => out.push_str(&other.to_json_string()),
                },
            }
        }
        Ok(out)
    }
}

fn compile(source: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(start) = rest.find("%{") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                literal.push_str(&rest[..start]);
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                let name = &after[..end];
                parts.push(match name.strip_prefix('+') {
                    Some(layout) => Part::Timestamp(Layout::new(layout)),
                    None => Part::Field(name.to_owned()),
                });
                rest = &after[end + 1..];
            }
            _ => {
                literal.push_str(&rest[..start + 2]);
                rest = after;
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}
