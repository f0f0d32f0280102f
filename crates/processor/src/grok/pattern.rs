//! 컴파일된 grok 패턴과 타입 힌트

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};

use logforge_core::Value;

use super::GrokError;

/// 조합된 패턴이 커질 수 있어 기본값보다 넉넉한 컴파일 크기 제한을 둡니다.
const REGEX_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// 캡처 값 변환 힌트 (`%{NAME:capture:int}`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TypeHint {
    #[default]
    String,
    Int,
    Float,
}

impl TypeHint {
    /// 캡처 문자열을 힌트 타입으로 변환합니다.
    ///
    /// 변환은 실패하지 않습니다. 숫자로 해석할 수 없으면 0을 돌려줍니다.
    pub fn convert(self, raw: &str) -> Value {
        match self {
            Self::String => Value::String(raw.to_owned()),
            Self::Int => Value::Int(raw.parse::<i64>().unwrap_or(0)),
            Self::Float => Value::Float(raw.parse::<f64>().unwrap_or(0.0)),
        }
    }
}

impl FromStr for TypeHint {
    type Err = GrokError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            other => Err(GrokError::InvalidTypeHint {
                hint: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
        })
    }
}

/// 패턴 적용 실패
#[derive(Debug, thiserror::Error)]
pub enum ApplyError<E: std::error::Error + 'static> {
    /// 입력이 패턴과 일치하지 않음
    #[error("no match")]
    NoMatch,

    /// 캡처 처리 콜백이 실패함
    #[error(transparent)]
    Visit(E),
}

/// 적용 가능한 컴파일된 패턴
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    types: HashMap<String, TypeHint>,
}

impl Pattern {
    /// 정규식 소스와 캡처 타입으로 패턴을 만듭니다.
    pub fn new(source: &str, types: HashMap<String, TypeHint>) -> Result<Self, GrokError> {
        let regex = RegexBuilder::new(source)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| GrokError::Regex {
                pattern: source.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self { regex, types })
    }

    /// 최종 정규식 소스
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// 입력에 패턴을 적용하고 이름 있는 캡처마다 `visit`을 호출합니다.
    ///
    /// 일치하지 않으면 [`ApplyError::NoMatch`]를 반환합니다. 참여하지 않은
    /// 캡처 그룹은 건너뜁니다.
    pub fn apply<E, F>(&self, input: &str, mut visit: F) -> Result<(), ApplyError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(&str, Value) -> Result<(), E>,
    {
        let captures = self.regex.captures(input).ok_or(ApplyError::NoMatch)?;
        for (index, name) in self.regex.capture_names().enumerate() {
            let (Some(name), Some(matched)) = (name, captures.get(index)) else {
                continue;
            };
            let hint = self.types.get(name).copied().unwrap_or_default();
            visit(name, hint.convert(matched.as_str())).map_err(ApplyError::Visit)?;
        }
        Ok(())
    }
}
