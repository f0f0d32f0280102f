//! `grok`: 필드에 grok 패턴을 차례로 적용해 이름 있는 캡처를 이벤트에 씁니다.
//!
//! 처음 일치한 패턴에서 멈춥니다. `local_patterns`는 `NAME pattern` 형식의
//! 정의 목록으로, 이 호출의 패턴을 컴파일할 때만 보입니다.

use std::sync::Arc;

use logforge_core::Event;

use crate::grok::{ApplyError, Grok, Pattern};

use super::{
    Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, remove_field, resolve_string,
};

static ARGUMENTS: [ArgumentSpec; 4] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::required("patterns", ArgumentKind::StringList).literal_only(),
    ArgumentSpec::optional("remove", ArgumentKind::Bool),
    ArgumentSpec::optional("local_patterns", ArgumentKind::StringList).literal_only(),
];

const FIELD: usize = 0;
const PATTERNS: usize = 1;
const REMOVE: usize = 2;
const LOCAL_PATTERNS: usize = 3;

#[derive(Debug)]
pub struct GrokAction {
    library: Arc<Grok>,
    patterns: Vec<Pattern>,
}

impl GrokAction {
    pub fn new(library: Arc<Grok>) -> Self {
        Self {
            library,
            patterns: Vec::new(),
        }
    }
}

impl Action for GrokAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
        let local = arguments
            .string_list(LOCAL_PATTERNS)
            .iter()
            .map(|line| parse_local(line))
            .collect::<Result<Vec<_>, _>>()?;

        let sources = arguments.string_list(PATTERNS);
        if sources.is_empty() {
            return Err(ActionError::new("at least one pattern is required"));
        }
        self.patterns = sources
            .iter()
            .map(|source| {
                self.library.compile_pattern(source, &local).map_err(|e| {
                    ActionError::new(format!("Failed to compile grok pattern '{source}': {e}"))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let field = arguments.string(FIELD).unwrap_or_default();
        let input = resolve_string(event, field)?.to_owned();

        for pattern in &self.patterns {
            // 캡처 저장이 실패해도 원본 필드 제거는 수행합니다. 제거 오류가 우선합니다.
            let outcome = match pattern.apply(&input, |name, value| event.set(name, value).map(|_| ())) {
                Ok(()) => Ok(()),
                Err(ApplyError::NoMatch) => continue,
                Err(ApplyError::Visit(e)) => Err(ActionError::new(format!("Grok failure: {e}"))),
            };
            if arguments.bool(REMOVE) {
                remove_field(event, field)?;
            }
            return outcome;
        }

        Err(ActionError::new(format!(
            "Field '{field}' was not matched by any of the given patterns"
        )))
    }
}

/// `NAME pattern` 한 줄을 나눕니다.
fn parse_local(line: &str) -> Result<(String, String), ActionError> {
    let invalid = || ActionError::new(format!("Invalid local pattern definition: {line}"));
    let (name, pattern) = line.trim().split_once(' ').ok_or_else(invalid)?;
    let pattern = pattern.trim_start();
    if name.is_empty() || pattern.is_empty() {
        return Err(invalid());
    }
    Ok((name.to_owned(), pattern.to_owned()))
}
