//! `json`: 문자열 필드를 JSON 객체로 디코딩해 최상위 키를 이벤트에 병합합니다.

use logforge_core::{Event, Value};

use super::{
    Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, remove_field, resolve_string,
};

static ARGUMENTS: [ArgumentSpec; 2] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::optional("remove", ArgumentKind::Bool),
];

const FIELD: usize = 0;
const REMOVE: usize = 1;

#[derive(Debug)]
pub struct JsonAction;

impl Action for JsonAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let field = arguments.string(FIELD).unwrap_or_default();
        let decoded: Value = serde_json::from_str(resolve_string(event, field)?)
            .map_err(|e| ActionError::new(format!("Decode of field '{field}' failed: {e}")))?;
        let Value::Map(entries) = decoded else {
            return Err(ActionError::new(format!(
                "Decode of field '{field}' failed: expected a JSON object, found {}",
                decoded.kind()
            )));
        };

        for (key, value) in entries {
            event.set(&key, value).map_err(|e| {
                ActionError::new(format!("Decode of field '{field}' failed: {e}"))
            })?;
        }
        if arguments.bool(REMOVE) {
            remove_field(event, field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ArgumentValue;
    use logforge_core::Map;

    fn arguments(remove: bool) -> Arguments {
        let mut arguments = Arguments::with_len(2);
        arguments.set(FIELD, ArgumentValue::String("payload".to_owned()));
        arguments.set(REMOVE, ArgumentValue::Bool(remove));
        arguments
    }

    fn event(payload: &str) -> Event {
        let mut map = Map::new();
        map.insert("payload".to_owned(), Value::from(payload));
        Event::new(map)
    }

    #[test]
    fn merges_top_level_keys() {
        let mut subject = event(r#"{"user": {"id": 7}, "ok": true}"#);
        JsonAction.process(&mut subject, &arguments(false)).unwrap();
        assert_eq!(subject.resolve("user[id]").unwrap(), Some(&Value::Int(7)));
        assert_eq!(subject.resolve("ok").unwrap(), Some(&Value::Bool(true)));
        assert!(subject.resolve("payload").unwrap().is_some());
    }

    #[test]
    fn removes_source_when_asked() {
        let mut subject = event(r#"{"a": 1}"#);
        JsonAction.process(&mut subject, &arguments(true)).unwrap();
        assert_eq!(subject.resolve("payload").unwrap(), None);
    }

    #[test]
    fn rejects_non_object_json() {
        let mut subject = event("[1, 2]");
        let err = JsonAction.process(&mut subject, &arguments(false)).unwrap_err();
        assert!(err.to_string().contains("expected a JSON object, found list"));
    }

    #[test]
    fn rejects_invalid_json() {
        let mut subject = event("{not json");
        let err = JsonAction.process(&mut subject, &arguments(false)).unwrap_err();
        assert!(err.to_string().starts_with("Decode of field 'payload' failed"));
    }

    #[test]
    fn builtin_violations_fail_the_merge() {
        let mut subject = event(r#"{"tags": "oops"}"#);
        assert!(JsonAction.process(&mut subject, &arguments(false)).is_err());
    }
}
