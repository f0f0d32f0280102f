//! 이벤트 모델
//!
//! [`Event`]는 파이프라인을 흐르는 단일 로그 레코드입니다. 중첩 맵 데이터와
//! 함께 입력 측이 넘겨준 불투명 컨텍스트, 확인 응답(ack) 수신자, 직렬화
//! 캐시를 가집니다.
//!
//! # 내장 필드
//! - `@timestamp`: 항상 시간 값
//! - `tags`: 정렬되고 중복 없는 문자열 목록 (`add_tag`/`remove_tag`로만 변경)
//! - `@metadata`: 하위 키만 설정 가능하며 직렬화 시 제외

pub mod builtin;
pub mod bundle;
pub mod layout;
pub mod path;
pub mod pattern;
pub mod sequencer;
pub mod value;

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::EventError;

pub use builtin::{METADATA_KEY, TAGS_KEY, TIMESTAMP_KEY};
pub use bundle::Bundle;
pub use layout::Layout;
pub use pattern::Pattern;
pub use sequencer::Sequencer;
pub use value::{Map, Value, format_timestamp};

/// 입력 측이 이벤트에 붙이는 불투명 컨텍스트
pub type EventContext = Arc<dyn Any + Send + Sync>;

/// 이벤트 처리 완료를 통보받는 수신자
///
/// 같은 수신자를 공유하는 연속된 이벤트는 한 번의 호출로 묶여 전달됩니다.
pub trait Acknowledger: Send + Sync {
    /// 처리 완료된 이벤트들을 통보합니다.
    fn acknowledge(&self, events: &[&Event]);
}

const TAGS_PARSE_FAILURE: &str = "_tags_parse_failure";
const TAGS_PARSE_ERROR: &str = "tags_parse_error";
const TIMESTAMP_PARSE_FAILURE: &str = "_timestamp_parse_failure";
const TIMESTAMP_PARSE_ERROR: &str = "timestamp_parse_error";

/// 파이프라인을 흐르는 로그 이벤트
#[derive(Clone)]
pub struct Event {
    context: Option<EventContext>,
    acker: Option<Arc<dyn Acknowledger>>,
    data: Map,
    encoded: Option<Bytes>,
}

impl Event {
    /// 데이터 맵으로 이벤트를 생성하고 내장 필드를 정규화합니다.
    ///
    /// - `tags`: 문자열은 단일 원소 목록으로, 문자열 목록은 정렬 및 중복 제거.
    ///   그 외 형태는 `_tags_parse_failure` 태그와 `tags_parse_error` 필드를 남깁니다.
    /// - `@timestamp`: RFC 3339 문자열을 파싱하고, 없거나 실패하면 현재 시각을 씁니다.
    /// - `@metadata`: 항상 빈 맵으로 초기화됩니다.
    pub fn new(data: Map) -> Self {
        let mut event = Self {
            context: None,
            acker: None,
            data,
            encoded: None,
        };
        event.normalize();
        event
    }

    /// JSON 객체 바이트로 이벤트를 생성합니다.
    pub fn from_json(raw: &[u8]) -> Result<Self, EventError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| EventError::Decode {
            reason: e.to_string(),
        })?;
        match value {
            Value::Map(map) => Ok(Self::new(map)),
            other => Err(EventError::Decode {
                reason: format!("expected a JSON object, found {}", other.kind()),
            }),
        }
    }

    /// 불투명 컨텍스트를 붙입니다.
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = Some(context);
        self
    }

    /// 확인 응답 수신자를 붙입니다.
    pub fn with_acknowledger(mut self, acker: Arc<dyn Acknowledger>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn context(&self) -> Option<&EventContext> {
        self.context.as_ref()
    }

    pub fn acknowledger(&self) -> Option<&Arc<dyn Acknowledger>> {
        self.acker.as_ref()
    }

    /// 데이터 맵 전체를 반환합니다.
    pub fn data(&self) -> &Map {
        &self.data
    }

    /// 이벤트의 `@timestamp`
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.data
            .get(TIMESTAMP_KEY)
            .and_then(Value::as_timestamp)
            .copied()
            .unwrap_or_else(Utc::now)
    }

    /// 경로의 값을 조회합니다. 없는 경로는 `Ok(None)`입니다.
    pub fn resolve(&self, path: &str) -> Result<Option<&Value>, EventError> {
        let segments = path::split_path(path)?;
        let (first, rest) = split_first(&segments);
        if let (Some(field), Some(next)) = (builtin::lookup(first), rest.first()) {
            field.verify_enter(next)?;
        }

        let mut current = match self.data.get(first) {
            Some(value) => value,
            None => return Ok(None),
        };
        for segment in rest {
            current = match current.as_map().and_then(|map| map.get(&**segment)) {
                Some(value) => value,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    /// 경로에 값을 설정하고 이전 값을 반환합니다.
    ///
    /// 중간 경로가 없거나 맵이 아니면 빈 맵으로 대체됩니다.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<Option<Value>, EventError> {
        let mut value = value.into();
        let segments = path::split_path(path)?;
        let (first, rest) = split_first(&segments);
        if let Some(field) = builtin::lookup(first) {
            match rest.first() {
                Some(next) => field.verify_enter(next)?,
                None => value = field.verify_set(value)?,
            }
        }

        self.encoded = None;
        Ok(set_in(&mut self.data, &segments, value))
    }

    /// 경로의 값을 제거하고 제거된 값을 반환합니다.
    pub fn unset(&mut self, path: &str) -> Result<Option<Value>, EventError> {
        let segments = path::split_path(path)?;
        let (first, rest) = split_first(&segments);
        if let Some(field) = builtin::lookup(first) {
            match rest.first() {
                Some(next) => field.verify_enter(next)?,
                None => field.verify_unset()?,
            }
        }

        let removed = unset_in(&mut self.data, &segments);
        if removed.is_some() {
            self.encoded = None;
        }
        Ok(removed)
    }

    /// 실패할 수 없는 경로에 값을 설정합니다.
    ///
    /// # Panics
    ///
    /// 경로가 잘못되었거나 내장 필드 제약을 위반하면 패닉합니다.
    /// 코드에 고정된 경로에만 사용해야 합니다.
    pub fn must_set(&mut self, path: &str, value: impl Into<Value>) {
        if let Err(e) = self.set(path, value) {
            panic!("must_set on '{path}' failed: {e}");
        }
    }

    /// 정렬된 태그 목록
    pub fn tags(&self) -> Vec<&str> {
        self.data
            .get(TAGS_KEY)
            .and_then(Value::as_list)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.data
            .get(TAGS_KEY)
            .and_then(Value::as_list)
            .is_some_and(|list| search_tag(list, tag).is_ok())
    }

    /// 태그를 추가합니다. 이미 있으면 아무것도 하지 않습니다.
    pub fn add_tag(&mut self, tag: &str) {
        let tags = self.tags_mut();
        if let Err(index) = search_tag(tags, tag) {
            tags.insert(index, Value::String(tag.to_owned()));
            self.encoded = None;
        }
    }

    /// 태그를 제거합니다. 없으면 아무것도 하지 않습니다.
    pub fn remove_tag(&mut self, tag: &str) {
        let tags = self.tags_mut();
        if let Ok(index) = search_tag(tags, tag) {
            tags.remove(index);
            self.encoded = None;
        }
    }

    /// 액션 실패를 기록합니다.
    ///
    /// `_{action}_error` 필드에 메시지를 쓰고 `_{action}_failure` 태그를 붙입니다.
    pub fn add_error(&mut self, action: &str, message: impl Into<String>) {
        self.data
            .insert(format!("_{action}_error"), Value::String(message.into()));
        self.add_tag(&format!("_{action}_failure"));
        self.encoded = None;
    }

    /// `@metadata`를 제외한 JSON 직렬화 결과
    ///
    /// 결과는 캐시되며 이벤트가 변경되면 무효화됩니다.
    pub fn bytes(&mut self) -> Bytes {
        if let Some(encoded) = &self.encoded {
            return encoded.clone();
        }
        let encoded = match serde_json::to_vec(&Downstream(&self.data)) {
            Ok(raw) => Bytes::from(raw),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode event");
                Bytes::new()
            }
        };
        self.encoded = Some(encoded.clone());
        encoded
    }

    /// 캐시된 직렬화 결과가 있으면 반환합니다.
    pub fn cached_bytes(&self) -> Option<&Bytes> {
        self.encoded.as_ref()
    }

    fn tags_mut(&mut self) -> &mut Vec<Value> {
        let entry = self
            .data
            .entry(TAGS_KEY.to_owned())
            .or_insert_with(|| Value::List(Vec::new()));
        if !matches!(entry, Value::List(_)) {
            *entry = Value::List(Vec::new());
        }
        match entry {
            Value::List(list) => list,
            _ => unreachable!("tags entry was just replaced with a list"),
        }
    }

    fn normalize(&mut self) {
        self.normalize_tags();
        self.normalize_timestamp();
        self.data
            .insert(METADATA_KEY.to_owned(), Value::Map(Map::new()));
    }

    fn normalize_tags(&mut self) {
        let tags = match self.data.shift_remove(TAGS_KEY) {
            None => Ok(Vec::new()),
            Some(Value::String(tag)) => Ok(vec![tag]),
            Some(Value::List(list)) => list
                .into_iter()
                .map(|item| match item {
                    Value::String(tag) => Ok(tag),
                    other => Err(format!(
                        "tags list must contain only strings, found a {}",
                        other.kind()
                    )),
                })
                .collect(),
            Some(other) => Err(format!(
                "tags was not a string or string list, was {}",
                other.kind()
            )),
        };

        let tags = tags.unwrap_or_else(|reason| {
            self.data
                .insert(TAGS_PARSE_ERROR.to_owned(), Value::String(reason));
            vec![TAGS_PARSE_FAILURE.to_owned()]
        });
        let mut tags = tags;
        tags.sort();
        tags.dedup();
        self.data.insert(
            TAGS_KEY.to_owned(),
            Value::List(tags.into_iter().map(Value::String).collect()),
        );
    }

    fn normalize_timestamp(&mut self) {
        let parsed = match self.data.get(TIMESTAMP_KEY) {
            None => Ok(Utc::now()),
            Some(Value::Timestamp(ts)) => Ok(*ts),
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| format!("failed to parse @timestamp '{raw}': {e}")),
            Some(other) => Err(format!("@timestamp was not a string, was {}", other.kind())),
        };

        let ts = parsed.unwrap_or_else(|reason| {
            self.data
                .insert(TIMESTAMP_PARSE_ERROR.to_owned(), Value::String(reason));
            self.add_tag(TIMESTAMP_PARSE_FAILURE);
            Utc::now()
        });

        match self.data.get_mut(TIMESTAMP_KEY) {
            Some(slot) => *slot = Value::Timestamp(ts),
            None => {
                self.data
                    .shift_insert(0, TIMESTAMP_KEY.to_owned(), Value::Timestamp(ts));
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("data", &self.data)
            .field("has_context", &self.context.is_some())
            .field("has_acknowledger", &self.acker.is_some())
            .finish()
    }
}

impl From<Map> for Event {
    fn from(data: Map) -> Self {
        Self::new(data)
    }
}

/// 연속된 이벤트를 같은 수신자끼리 묶어 확인 응답을 전달합니다.
///
/// 수신자가 없는 이벤트는 건너뜁니다.
pub fn dispatch_ack(events: &[Event]) {
    let mut group: Vec<&Event> = Vec::new();
    let mut current: Option<&Arc<dyn Acknowledger>> = None;

    for event in events {
        let acker = event.acker.as_ref();
        let same = match (current, acker) {
            (Some(a), Some(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (None, None) => true,
            _ => false,
        };
        if !same {
            if let Some(previous) = current {
                previous.acknowledge(&group);
            }
            group.clear();
            current = acker;
        }
        if acker.is_some() {
            group.push(event);
        }
    }
    if let Some(previous) = current {
        previous.acknowledge(&group);
    }
}

fn split_first<'a>(segments: &'a [Cow<'a, str>]) -> (&'a str, &'a [Cow<'a, str>]) {
    match segments.split_first() {
        Some((first, rest)) => (&**first, rest),
        None => ("", &[]),
    }
}

fn search_tag(tags: &[Value], tag: &str) -> Result<usize, usize> {
    tags.binary_search_by(|probe| probe.as_str().unwrap_or_default().cmp(tag))
}

fn set_in(map: &mut Map, segments: &[Cow<'_, str>], value: Value) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Map(Map::new()));
        if !matches!(entry, Value::Map(_)) {
            *entry = Value::Map(Map::new());
        }
        current = entry.as_map_mut()?;
    }
    current.insert(last.to_string(), value)
}

fn unset_in(map: &mut Map, segments: &[Cow<'_, str>]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = map;
    for segment in parents {
        current = current.get_mut(&**segment)?.as_map_mut()?;
    }
    current.shift_remove(&**last)
}

/// `@metadata`를 제외하고 직렬화하는 뷰
struct Downstream<'a>(&'a Map);

impl Serialize for Downstream<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.0.iter().filter(|(key, _)| key.as_str() != METADATA_KEY);
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event_from(json: serde_json::Value) -> Event {
        Event::from_json(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn new_event_has_builtins() {
        let event = Event::new(Map::new());
        assert!(event.data().get(TIMESTAMP_KEY).unwrap().as_timestamp().is_some());
        assert_eq!(event.tags(), Vec::<&str>::new());
        assert_eq!(
            event.data().get(METADATA_KEY),
            Some(&Value::Map(Map::new()))
        );
    }

    #[test]
    fn string_tag_becomes_list() {
        let event = event_from(serde_json::json!({"tags": "single"}));
        assert_eq!(event.tags(), vec!["single"]);
    }

    #[test]
    fn tag_list_is_sorted_and_deduplicated() {
        let event = event_from(serde_json::json!({"tags": ["b", "a", "b"]}));
        assert_eq!(event.tags(), vec!["a", "b"]);
    }

    #[test]
    fn invalid_tags_are_recorded() {
        let event = event_from(serde_json::json!({"tags": 5}));
        assert_eq!(event.tags(), vec!["_tags_parse_failure"]);
        assert!(event.data().contains_key("tags_parse_error"));

        let event = event_from(serde_json::json!({"tags": ["a", 1]}));
        assert_eq!(event.tags(), vec!["_tags_parse_failure"]);
    }

    #[test]
    fn rfc3339_timestamp_is_parsed() {
        let event = event_from(serde_json::json!({"@timestamp": "2020-01-02T03:04:05Z"}));
        assert_eq!(event.timestamp().to_rfc3339(), "2020-01-02T03:04:05+00:00");
        assert!(!event.has_tag("_timestamp_parse_failure"));
    }

    #[test]
    fn invalid_timestamp_is_recorded() {
        let event = event_from(serde_json::json!({"@timestamp": "yesterday"}));
        assert!(event.has_tag("_timestamp_parse_failure"));
        assert!(event.data().contains_key("timestamp_parse_error"));
        assert!(event.data().get(TIMESTAMP_KEY).unwrap().as_timestamp().is_some());
    }

    #[test]
    fn incoming_metadata_is_discarded() {
        let event = event_from(serde_json::json!({"@metadata": {"beat": "x"}}));
        assert_eq!(event.resolve("[@metadata][beat]").unwrap(), None);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Event::from_json(b"[1,2]").is_err());
        assert!(Event::from_json(b"{broken").is_err());
    }

    #[test]
    fn resolve_nested_paths() {
        let event = event_from(serde_json::json!({"a": {"b": {"c": 1}}, "s": "x"}));
        assert_eq!(event.resolve("a[b][c]").unwrap(), Some(&Value::Int(1)));
        assert_eq!(event.resolve("a[missing]").unwrap(), None);
        assert_eq!(event.resolve("s[inner]").unwrap(), None);
        assert!(event.resolve("a[").is_err());
    }

    #[test]
    fn set_creates_and_replaces_intermediates() {
        let mut event = event_from(serde_json::json!({"a": "scalar"}));
        event.set("a[b][c]", 5i64).unwrap();
        assert_eq!(event.resolve("a[b][c]").unwrap(), Some(&Value::Int(5)));

        let previous = event.set("a[b][c]", "x").unwrap();
        assert_eq!(previous, Some(Value::Int(5)));
    }

    #[test]
    fn set_respects_builtins() {
        let mut event = Event::new(Map::new());
        let err = event.set("tags", Value::List(vec![])).unwrap_err();
        assert!(err.to_string().contains("use add_tag or remove_tag"));
        let err = event.set("@timestamp", "now").unwrap_err();
        assert!(err.to_string().contains("non time value"));
        assert!(event.set("@timestamp[year]", 1i64).is_err());
        assert!(event.set("@metadata", Map::new()).is_err());

        event.set("[@metadata][beat]", "filebeat").unwrap();
        assert_eq!(
            event.resolve("[@metadata][beat]").unwrap(),
            Some(&Value::from("filebeat"))
        );
        event.set("@timestamp", Utc::now()).unwrap();
    }

    #[test]
    fn unset_removes_and_guards_builtins() {
        let mut event = event_from(serde_json::json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(event.unset("a[b]").unwrap(), Some(Value::Int(1)));
        assert_eq!(event.unset("a[b]").unwrap(), None);
        assert_eq!(event.unset("x[y]").unwrap(), None);

        let err = event.unset("@timestamp").unwrap_err();
        assert_eq!(err.to_string(), "Builtin entry '@timestamp' cannot be unset");
        assert!(event.unset("tags").is_err());
        assert!(event.unset("@metadata").is_err());
    }

    #[test]
    fn escaped_brackets_address_literal_keys() {
        let mut event = Event::new(Map::new());
        event.set(r"headers[x\[1\]]", "v").unwrap();
        let headers = event.resolve("headers").unwrap().and_then(Value::as_map).unwrap();
        assert_eq!(headers.get("x[1]"), Some(&Value::from("v")));
        assert_eq!(
            event.unset(r"headers[x\[1\]]").unwrap(),
            Some(Value::from("v"))
        );
    }

    #[test]
    fn unset_of_builtin_names_the_field_not_the_path() {
        let mut event = Event::new(Map::new());
        event.add_tag("keep");
        let err = event.unset("[tags]").unwrap_err();
        assert_eq!(
            err,
            EventError::Builtin {
                field: "tags".to_owned(),
                reason: "Builtin entry 'tags' cannot be unset".to_owned(),
            }
        );
        assert_eq!(event.tags(), vec!["keep"]);
    }

    #[test]
    #[should_panic(expected = "must_set")]
    fn must_set_panics_on_invalid_path() {
        let mut event = Event::new(Map::new());
        event.must_set("a]", 1i64);
    }

    #[test]
    fn tags_stay_sorted() {
        let mut event = Event::new(Map::new());
        event.add_tag("zeta");
        event.add_tag("alpha");
        event.add_tag("mid");
        event.add_tag("alpha");
        assert_eq!(event.tags(), vec!["alpha", "mid", "zeta"]);

        event.remove_tag("mid");
        event.remove_tag("absent");
        assert_eq!(event.tags(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn add_error_records_field_and_tag() {
        let mut event = Event::new(Map::new());
        event.add_error("date", "boom");
        assert_eq!(event.resolve("_date_error").unwrap(), Some(&Value::from("boom")));
        assert!(event.has_tag("_date_failure"));
    }

    #[test]
    fn bytes_excludes_metadata_and_caches() {
        let mut event = event_from(serde_json::json!({"message": "hi"}));
        event.set("[@metadata][x]", 1i64).unwrap();
        let encoded = event.bytes();
        let decoded: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded["message"], "hi");
        assert!(decoded.get("@metadata").is_none());
        assert!(event.cached_bytes().is_some());

        event.set("message", "changed").unwrap();
        assert!(event.cached_bytes().is_none());
        let decoded: serde_json::Value = serde_json::from_slice(&event.bytes()).unwrap();
        assert_eq!(decoded["message"], "changed");
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<usize>>,
    }

    impl Acknowledger for Recorder {
        fn acknowledge(&self, events: &[&Event]) {
            self.calls.lock().unwrap().push(events.len());
        }
    }

    #[test]
    fn dispatch_ack_groups_consecutive_events() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let make = |acker: &Arc<Recorder>| {
            Event::new(Map::new()).with_acknowledger(acker.clone() as Arc<dyn Acknowledger>)
        };

        let events = vec![
            make(&first),
            make(&first),
            make(&second),
            Event::new(Map::new()),
            make(&first),
        ];
        dispatch_ack(&events);

        assert_eq!(*first.calls.lock().unwrap(), vec![2, 1]);
        assert_eq!(*second.calls.lock().unwrap(), vec![1]);
    }
}
