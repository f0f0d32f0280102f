//! 스트림 장식
//!
//! 입력에서 읽은 데이터 맵에 호스트, 시간대, 전역 필드와 스트림 고정 필드를
//! 붙인 뒤 [`Event`]로 만듭니다.

use chrono::Local;

use crate::config::{GeneralConfig, StreamConfig};
use crate::event::{Event, Layout, Map, TIMESTAMP_KEY, Value};

/// 스트림 설정으로 이벤트를 생성하는 장식기
#[derive(Debug, Clone)]
pub struct StreamDecorator {
    host: Option<String>,
    timezone: Option<String>,
    fields: Map,
}

impl StreamDecorator {
    pub fn new(general: &GeneralConfig, stream: &StreamConfig) -> Self {
        let timezone = stream
            .add_timezone_field
            .then(|| Layout::new("-0700 MST").format(&Local::now()));

        let mut fields = Map::new();
        for (key, value) in general.global_fields.iter().chain(stream.fields.iter()) {
            fields.insert(key.clone(), Value::from(value.clone()));
        }

        Self {
            host: stream.add_host_field.then(|| general.host.clone()),
            timezone,
            fields,
        }
    }

    /// 데이터 맵을 장식합니다. `@timestamp`는 없을 때만 현재 시각으로 채웁니다.
    pub fn decorate(&self, mut data: Map) -> Map {
        if !data.contains_key(TIMESTAMP_KEY) {
            data.shift_insert(0, TIMESTAMP_KEY.to_owned(), Value::Timestamp(chrono::Utc::now()));
        }
        if let Some(host) = &self.host {
            data.insert("host".to_owned(), Value::String(host.clone()));
        }
        if let Some(timezone) = &self.timezone {
            data.insert("timezone".to_owned(), Value::String(timezone.clone()));
        }
        for (key, value) in &self.fields {
            data.insert(key.clone(), value.clone());
        }
        data
    }

    /// 장식된 데이터로 이벤트를 생성합니다.
    pub fn new_event(&self, data: Map) -> Event {
        Event::new(self.decorate(data))
    }
}
