//! `kv`: `name=value` 쌍을 파싱해 `<prefix><name>` 필드에 저장합니다.
//!
//! 값은 공백으로 끝나는 원시 값이거나 작은/큰따옴표로 감싼 값입니다. 따옴표
//! 안의 백슬래시는 다음 문자를 이스케이프합니다 (저장 시 원문 유지). 키의
//! 대괄호는 제거됩니다. `prefix`는 `%{field}` 치환을 포함할 수 있는 상수 패턴입니다.

use logforge_core::{Event, Pattern};

use super::{Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, resolve_string};

static ARGUMENTS: [ArgumentSpec; 2] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::required("prefix", ArgumentKind::String).literal_only(),
];

const FIELD: usize = 0;
const PREFIX: usize = 1;

#[derive(Debug, Default)]
pub struct KvAction {
    prefix: Option<Pattern>,
}

impl Action for KvAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
        self.prefix = arguments.string(PREFIX).map(Pattern::new);
        Ok(())
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let field = arguments.string(FIELD).unwrap_or_default();
        let input = resolve_string(event, field)?.to_owned();
        let prefix = match &self.prefix {
            Some(pattern) => pattern.format(event).map_err(|_| {
                ActionError::new(format!(
                    "Failed to format prefix from event: {}",
                    pattern.as_str()
                ))
            })?,
            None => String::new(),
        };

        for (name, value) in parse_pairs(&input)? {
            let target = format!("{prefix}{}", name.replace(['[', ']'], ""));
            event.set(&target, value).map_err(|e| {
                ActionError::new(format!("Failed to set field '{target}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// 파서 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// 이름 시작 대기
    Name,
    /// 이름 읽는 중
    NameRaw,
    /// 값 시작 대기
    Value,
    /// 따옴표 없는 값
    ValueRaw,
    /// 따옴표 값
    ValueQuoted,
    /// 따옴표 값 안의 이스케이프 직후
    ValueQuotedEsc,
    /// 닫는 따옴표 직후
    ValueQuotedEnd,
}

/// 입력을 `(name, value)` 쌍으로 나눕니다.
fn parse_pairs(input: &str) -> Result<Vec<(String, String)>, ActionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut pairs = Vec::new();
    let mut state = State::Name;
    let mut name = String::new();
    let mut name_start = 0;
    let mut value_start = 0;
    let mut quote = '"';

    for (idx, &c) in chars.iter().enumerate() {
        match state {
            State::Name => {
                if c == '=' {
                    return Err(ActionError::new(
                        "Parsing interrupted, encountered key with no name",
                    ));
                }
                state = State::NameRaw;
                name_start = idx;
            }
            State::NameRaw => {
                if c == '=' {
                    name = chars[name_start..idx].iter().collect();
                    state = State::Value;
                }
            }
            State::Value => {
                if c == '"' || c == '\'' {
                    quote = c;
                    value_start = idx + 1;
                    state = State::ValueQuoted;
                } else {
                    value_start = idx;
                    state = State::ValueRaw;
                }
            }
            State::ValueRaw => {
                if c == ' ' {
                    pairs.push((name.clone(), chars[value_start..idx].iter().collect()));
                    state = State::Name;
                }
            }
            State::ValueQuoted => {
                if c == quote {
                    pairs.push((name.clone(), chars[value_start..idx].iter().collect()));
                    state = State::ValueQuotedEnd;
                } else if c == '\\' {
                    state = State::ValueQuotedEsc;
                }
            }
            State::ValueQuotedEsc => state = State::ValueQuoted,
            State::ValueQuotedEnd => {
                if c != ' ' {
                    return Err(ActionError::new(
                        "Parsing interrupted, unexpected text after end of quoted value",
                    ));
                }
                state = State::Name;
            }
        }
    }

    match state {
        State::ValueRaw => pairs.push((name, chars[value_start..].iter().collect())),
        State::Name | State::ValueQuotedEnd => {}
        _ => {
            return Err(ActionError::new(
                "Parsing interrupted, unexpected end of field",
            ));
        }
    }
    Ok(pairs)
}
