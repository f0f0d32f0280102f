//! 액션 레지스트리와 인자 바인딩
//!
//! 액션은 이름으로 등록된 생성자가 만들어 내는 [`Action`] 구현체입니다.
//! 스크립트의 `name arg=expr, ...` 문장은 [`ActionRegistry::bind`]를 거쳐
//! [`ActionCall`]이 됩니다.
//!
//! # 바인딩 절차
//!
//! 1. 액션의 인자 설명([`ArgumentSpec`]) 목록을 얻습니다.
//! 2. 상수로 접힌 인자는 즉시 타입 변환해 인자 벡터의 해당 위치에 넣습니다.
//!    동적 인자는 위치와 표현식을 기억합니다. 상수 전용 인자가 동적이면 실패합니다.
//! 3. 필수 인자가 빠졌거나 모르는 인자가 있으면 실패합니다.
//! 4. [`Action::init`]을 상수 인자로 호출합니다 (동적 위치는 비어 있음).
//! 5. 동적 인자가 없으면 인자 벡터를 공유하는 정적 호출이 됩니다.

mod date;
mod geoip;
mod grok;
mod json;
mod kv;
mod tag;
mod user_agent;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use logforge_core::metrics as m;
use logforge_core::{Event, Value};

use crate::expr::Expression;
use crate::grok::Grok;

pub use date::DateAction;
pub use geoip::GeoIpAction;
pub use grok::GrokAction;
pub use json::JsonAction;
pub use kv::KvAction;
pub use tag::{AddTagAction, RemoveTagAction};
pub use user_agent::UserAgentAction;

/// 액션이 이벤트 처리에 실패했을 때의 메시지
///
/// 워커는 이를 이벤트에 `_{action}_error` / `_{action}_failure`로 기록합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 인자 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    String,
    Bool,
    StringList,
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::StringList => "list of strings",
        })
    }
}

/// 변환된 인자 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    String(String),
    Bool(bool),
    StringList(Vec<String>),
}

/// 인자 설명
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub kind: ArgumentKind,
    pub required: bool,
    /// 상수만 허용 (초기화 시 사용하는 인자)
    pub literal: bool,
}

impl ArgumentSpec {
    pub const fn optional(name: &'static str, kind: ArgumentKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            literal: false,
        }
    }

    pub const fn required(name: &'static str, kind: ArgumentKind) -> Self {
        Self {
            required: true,
            ..Self::optional(name, kind)
        }
    }

    pub const fn literal_only(self) -> Self {
        Self {
            literal: true,
            ..self
        }
    }

    /// 값을 이 인자의 타입으로 변환합니다.
    pub fn convert(&self, value: &Value) -> Result<ArgumentValue, String> {
        let mismatch = || format!("expected {}, found {}", self.kind, value.kind());
        match (self.kind, value) {
            (ArgumentKind::String, Value::String(s)) => Ok(ArgumentValue::String(s.clone())),
            (ArgumentKind::String, Value::Bytes(b)) => String::from_utf8(b.clone())
                .map(ArgumentValue::String)
                .map_err(|_| "bytes are not valid UTF-8".to_owned()),
            (ArgumentKind::Bool, Value::Bool(b)) => Ok(ArgumentValue::Bool(*b)),
            (ArgumentKind::StringList, Value::List(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(mismatch))
                .collect::<Result<_, _>>()
                .map(ArgumentValue::StringList),
            _ => Err(mismatch()),
        }
    }
}

/// 인자 벡터. 위치는 [`Action::arguments`]의 순서를 따릅니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Vec<Option<ArgumentValue>>);

impl Arguments {
    pub fn with_len(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn get(&self, index: usize) -> Option<&ArgumentValue> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn set(&mut self, index: usize, value: ArgumentValue) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = Some(value);
        }
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        match self.get(index) {
            Some(ArgumentValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// 없는 bool 인자는 `false`입니다.
    pub fn bool(&self, index: usize) -> bool {
        matches!(self.get(index), Some(ArgumentValue::Bool(true)))
    }

    pub fn string_list(&self, index: usize) -> &[String] {
        match self.get(index) {
            Some(ArgumentValue::StringList(list)) => list,
            _ => &[],
        }
    }
}

/// 이벤트를 변경하는 액션
pub trait Action: Send + Sync + fmt::Debug {
    /// 인자 설명 목록. 순서가 인자 벡터의 위치입니다.
    fn arguments(&self) -> &'static [ArgumentSpec];

    /// 상수 인자로 한 번 초기화합니다 (패턴 컴파일, 데이터베이스 열기 등).
    fn init(&mut self, _arguments: &Arguments) -> Result<(), ActionError> {
        Ok(())
    }

    /// 이벤트 하나를 처리합니다.
    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError>;
}

/// 액션 생성 시 참조하는 공유 자원
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// grok 패턴 라이브러리
    pub grok: Arc<Grok>,
    /// `geoip`에 `database`가 없을 때 사용할 경로
    pub geoip_database: Option<PathBuf>,
    /// `user_agent`에 `definitions`가 없을 때 사용할 규칙 파일
    pub user_agent_definitions: Option<PathBuf>,
}

/// 바인딩 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments to {action}: {reason}")]
    InvalidArguments { action: String, reason: String },
}

type Factory = Arc<dyn Fn(&ActionContext) -> Box<dyn Action> + Send + Sync>;

/// 이름으로 액션 생성자를 찾는 레지스트리
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionRegistry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// 내장 액션이 모두 등록된 레지스트리
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("add_tag", |_| Box::new(AddTagAction));
        registry.register("remove_tag", |_| Box::new(RemoveTagAction));
        registry.register("date", |_| Box::new(DateAction::default()));
        registry.register("json", |_| Box::new(JsonAction));
        registry.register("kv", |_| Box::new(KvAction::default()));
        registry.register("grok", |ctx| Box::new(GrokAction::new(Arc::clone(&ctx.grok))));
        registry.register("geoip", |ctx| {
            Box::new(GeoIpAction::new(ctx.geoip_database.clone()))
        });
        registry.register("user_agent", |ctx| {
            Box::new(UserAgentAction::new(ctx.user_agent_definitions.clone()))
        });
        registry
    }

    /// 액션을 등록합니다. 같은 이름은 덮어씁니다.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ActionContext) -> Box<dyn Action> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 등록된 액션 이름 (정렬됨)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// 액션을 만들고 인자를 바인딩합니다.
    pub fn bind(
        &self,
        name: &str,
        provided: &[(&str, &Expression)],
        ctx: &ActionContext,
    ) -> Result<ActionCall, BindError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BindError::UnknownAction(name.to_owned()))?;
        let invalid = |reason: String| BindError::InvalidArguments {
            action: name.to_owned(),
            reason,
        };

        let mut action = factory(ctx);
        let specs = action.arguments();
        let mut arguments = Arguments::with_len(specs.len());
        let mut dynamic = Vec::new();
        let mut missing = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            let Some((_, expr)) = provided.iter().find(|(arg, _)| *arg == spec.name) else {
                if spec.required {
                    missing.push(spec.name);
                }
                continue;
            };
            match expr.as_literal() {
                Some(value) => {
                    let converted = spec.convert(value).map_err(|e| {
                        invalid(format!("argument {} is invalid: {e}", spec.name))
                    })?;
                    arguments.set(index, converted);
                }
                None if spec.literal => {
                    return Err(invalid(format!(
                        "argument {} must be a literal and cannot be dynamic",
                        spec.name
                    )));
                }
                None => dynamic.push(DynamicArgument {
                    index,
                    spec: *spec,
                    value: (*expr).clone(),
                }),
            }
        }

        if !missing.is_empty() {
            return Err(invalid(format!(
                "missing required arguments: {}",
                missing.join(", ")
            )));
        }
        let unknown: Vec<&str> = provided
            .iter()
            .map(|(arg, _)| *arg)
            .filter(|arg| !specs.iter().any(|spec| spec.name == *arg))
            .collect();
        if !unknown.is_empty() {
            return Err(invalid(format!("unknown arguments: {}", unknown.join(", "))));
        }

        action.init(&arguments).map_err(|e| invalid(e.to_string()))?;

        Ok(ActionCall {
            name: name.to_owned(),
            action: Arc::from(action),
            arguments: Arc::new(arguments),
            dynamic,
        })
    }
}

/// 이벤트마다 평가되는 인자
#[derive(Debug, Clone)]
struct DynamicArgument {
    index: usize,
    spec: ArgumentSpec,
    value: Expression,
}

/// 바인딩이 끝난 액션 호출
#[derive(Debug, Clone)]
pub struct ActionCall {
    name: String,
    action: Arc<dyn Action>,
    arguments: Arc<Arguments>,
    dynamic: Vec<DynamicArgument>,
}

impl ActionCall {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 모든 인자가 상수인지 여부
    pub fn is_static(&self) -> bool {
        self.dynamic.is_empty()
    }

    /// 액션을 실행합니다. 실패는 이벤트에 기록되고 처리는 계속됩니다.
    pub fn execute(&self, event: &mut Event) {
        if self.dynamic.is_empty() {
            self.run(event, &self.arguments);
            return;
        }

        let mut arguments = Arguments::clone(&self.arguments);
        for argument in &self.dynamic {
            let value = argument.value.value(event);
            if value.is_null() && !argument.spec.required {
                continue;
            }
            match argument.spec.convert(&value) {
                Ok(converted) => arguments.set(argument.index, converted),
                Err(e) => {
                    self.fail(
                        event,
                        ActionError::new(format!(
                            "argument {} is invalid: {e}",
                            argument.spec.name
                        )),
                    );
                    return;
                }
            }
        }
        self.run(event, &arguments);
    }

    fn run(&self, event: &mut Event, arguments: &Arguments) {
        if let Err(e) = self.action.process(event, arguments) {
            self.fail(event, e);
        }
    }

    fn fail(&self, event: &mut Event, error: ActionError) {
        metrics::counter!(m::PROCESSOR_ACTION_FAILURES_TOTAL, m::LABEL_ACTION => self.name.clone())
            .increment(1);
        tracing::trace!(action = %self.name, error = %error, "action failed");
        event.add_error(&self.name, error.to_string());
    }
}

/// 필드를 문자열로 읽습니다. 액션 공통 전처리입니다.
pub(crate) fn resolve_string<'e>(event: &'e Event, field: &str) -> Result<&'e str, ActionError> {
    match event.resolve(field) {
        Ok(Some(Value::String(value))) => Ok(value),
        Ok(_) => Err(ActionError::new(format!(
            "Field '{field}' is not present or not a string"
        ))),
        Err(e) => Err(ActionError::new(format!(
            "Field '{field}' could not be resolved: {e}"
        ))),
    }
}

/// `remove` 인자가 켜져 있을 때 원본 필드를 지웁니다.
pub(crate) fn remove_field(event: &mut Event, field: &str) -> Result<(), ActionError> {
    event
        .unset(field)
        .map(|_| ())
        .map_err(|e| ActionError::new(format!("Failed to remove field '{field}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Recorder;

    static RECORDER_ARGS: [ArgumentSpec; 3] = [
        ArgumentSpec::required("field", ArgumentKind::String),
        ArgumentSpec::optional("flag", ArgumentKind::Bool),
        ArgumentSpec::optional("names", ArgumentKind::StringList).literal_only(),
    ];

    impl Action for Recorder {
        fn arguments(&self) -> &'static [ArgumentSpec] {
            &RECORDER_ARGS
        }

        fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
            if arguments.string_list(2).iter().any(|n| n == "bad") {
                return Err(ActionError::new("bad name"));
            }
            Ok(())
        }

        fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
            let field = arguments.string(0).unwrap_or_default().to_owned();
            if field == "fail" {
                return Err(ActionError::new("asked to fail"));
            }
            event
                .set("recorded", field)
                .map_err(|e| ActionError::new(e.to_string()))?;
            event
                .set("flag", arguments.bool(1))
                .map_err(|e| ActionError::new(e.to_string()))?;
            Ok(())
        }
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register("recorder", |_| Box::new(Recorder));
        registry
    }

    fn bind(args: &[(&str, &str)]) -> Result<ActionCall, BindError> {
        let parsed: Vec<(&str, Expression)> = args
            .iter()
            .map(|(name, src)| (*name, Expression::parse(src).unwrap()))
            .collect();
        let refs: Vec<(&str, &Expression)> = parsed.iter().map(|(n, e)| (*n, e)).collect();
        registry().bind("recorder", &refs, &ActionContext::default())
    }

    fn event(json: serde_json::Value) -> Event {
        match Value::from(json) {
            Value::Map(map) => Event::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn literal_arguments_make_a_static_call() {
        let call = bind(&[("field", "\"a\""), ("flag", "true")]).unwrap();
        assert!(call.is_static());
        let mut subject = event(serde_json::json!({}));
        call.execute(&mut subject);
        assert_eq!(subject.resolve("recorded").unwrap(), Some(&Value::from("a")));
        assert_eq!(subject.resolve("flag").unwrap(), Some(&Value::Bool(true)));
    }

    #[test]
    fn dynamic_arguments_are_evaluated_per_event() {
        let call = bind(&[("field", "event.source")]).unwrap();
        assert!(!call.is_static());
        let mut first = event(serde_json::json!({"source": "x"}));
        let mut second = event(serde_json::json!({"source": "y"}));
        call.execute(&mut first);
        call.execute(&mut second);
        assert_eq!(first.resolve("recorded").unwrap(), Some(&Value::from("x")));
        assert_eq!(second.resolve("recorded").unwrap(), Some(&Value::from("y")));
    }

    #[test]
    fn dynamic_conversion_failure_is_recorded_on_event() {
        let call = bind(&[("field", "event.count")]).unwrap();
        let mut subject = event(serde_json::json!({"count": 5}));
        call.execute(&mut subject);
        assert!(subject.has_tag("_recorder_failure"));
        assert_eq!(
            subject.resolve("_recorder_error").unwrap(),
            Some(&Value::from("argument field is invalid: expected string, found int"))
        );
        assert_eq!(subject.resolve("recorded").unwrap(), None);
    }

    #[test]
    fn action_failure_is_recorded_on_event() {
        let call = bind(&[("field", "\"fail\"")]).unwrap();
        let mut subject = event(serde_json::json!({}));
        call.execute(&mut subject);
        assert!(subject.has_tag("_recorder_failure"));
        assert_eq!(
            subject.resolve("_recorder_error").unwrap(),
            Some(&Value::from("asked to fail"))
        );
    }

    #[test]
    fn reports_missing_required_arguments() {
        let err = bind(&[("flag", "true")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments to recorder: missing required arguments: field"
        );
    }

    #[test]
    fn reports_unknown_arguments() {
        let err = bind(&[("field", "\"a\""), ("extra", "1"), ("more", "2")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments to recorder: unknown arguments: extra, more"
        );
    }

    #[test]
    fn rejects_dynamic_literal_only_arguments() {
        let err = bind(&[("field", "\"a\""), ("names", "event.names")]).unwrap_err();
        assert!(err
            .to_string()
            .ends_with("argument names must be a literal and cannot be dynamic"));
    }

    #[test]
    fn rejects_mistyped_literals() {
        let err = bind(&[("field", "\"a\""), ("flag", "\"yes\"")]).unwrap_err();
        assert!(err
            .to_string()
            .ends_with("argument flag is invalid: expected bool, found string"));
        let err = bind(&[("field", "\"a\""), ("names", "[\"a\", 1]")]).unwrap_err();
        assert!(err.to_string().contains("argument names is invalid"));
    }

    #[test]
    fn init_errors_fail_binding() {
        let err = bind(&[("field", "\"a\""), ("names", "[\"bad\"]")]).unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments to recorder: bad name");
    }

    #[test]
    fn unknown_action_is_reported() {
        let err = registry()
            .bind("missing", &[], &ActionContext::default())
            .unwrap_err();
        assert_eq!(err, BindError::UnknownAction("missing".to_owned()));
    }

    #[test]
    fn default_registry_lists_bundled_actions() {
        let registry = ActionRegistry::with_defaults();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "add_tag",
                "date",
                "geoip",
                "grok",
                "json",
                "kv",
                "remove_tag",
                "user_agent"
            ]
        );
    }
}
