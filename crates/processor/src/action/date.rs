//! `date`: 문자열 필드를 파싱해 `@timestamp`에 씁니다.
//!
//! `formats`는 Go 스타일 레이아웃 목록이며 순서대로 시도합니다. 특수 레이아웃
//! `UNIX`는 소수 초를 포함할 수 있는 epoch 초입니다 (소수부는 10^9를 곱해
//! 나노초로 변환). 레이아웃에 연도가 없으면 현재 연도를 씁니다.

use chrono::{DateTime, TimeDelta, Utc};

use logforge_core::Event;
use logforge_core::event::{Layout, TIMESTAMP_KEY};

use super::{
    Action, ActionError, ArgumentKind, ArgumentSpec, Arguments, remove_field, resolve_string,
};

static ARGUMENTS: [ArgumentSpec; 3] = [
    ArgumentSpec::required("field", ArgumentKind::String),
    ArgumentSpec::required("formats", ArgumentKind::StringList).literal_only(),
    ArgumentSpec::optional("remove", ArgumentKind::Bool),
];

const FIELD: usize = 0;
const FORMATS: usize = 1;
const REMOVE: usize = 2;

/// `UNIX` 특수 레이아웃
const UNIX_LAYOUT: &str = "UNIX";

#[derive(Debug, Clone)]
enum Format {
    Unix,
    Layout(Layout),
}

#[derive(Debug, Default)]
pub struct DateAction {
    formats: Vec<Format>,
}

impl Action for DateAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn init(&mut self, arguments: &Arguments) -> Result<(), ActionError> {
        let formats = arguments.string_list(FORMATS);
        if formats.is_empty() {
            return Err(ActionError::new("at least one format is required"));
        }
        self.formats = formats
            .iter()
            .map(|format| match format.as_str() {
                UNIX_LAYOUT => Format::Unix,
                layout => Format::Layout(Layout::new(layout)),
            })
            .collect();
        Ok(())
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        let field = arguments.string(FIELD).unwrap_or_default();
        let value = resolve_string(event, field)?;

        let now = Utc::now();
        let parsed = self.formats.iter().find_map(|format| match format {
            Format::Unix => parse_unix(value),
            Format::Layout(layout) => layout.parse(value, now).ok(),
        });
        let Some(timestamp) = parsed else {
            return Err(ActionError::new(format!(
                "Field '{field}' could not be parsed with any of the given formats"
            )));
        };

        event
            .set(TIMESTAMP_KEY, timestamp)
            .map_err(|e| ActionError::new(e.to_string()))?;
        if arguments.bool(REMOVE) {
            remove_field(event, field)?;
        }
        Ok(())
    }
}

/// `1596412800` 또는 `1596412800.25` 형태의 epoch 초
///
/// 음수 부호는 소수부에도 적용됩니다 (`-1.5`는 1.5초 전).
fn parse_unix(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    let seconds: i64 = seconds.parse().ok()?;
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mut nanos: i64 = 0;
    for (position, digit) in fraction.bytes().take(9).enumerate() {
        nanos += i64::from(digit - b'0') * 10i64.pow(8 - position as u32);
    }
    if value.starts_with('-') {
        nanos = -nanos;
    }
    DateTime::from_timestamp(seconds, 0)?.checked_add_signed(TimeDelta::nanoseconds(nanos))
}
