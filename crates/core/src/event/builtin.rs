//! 내장 필드 제약
//!
//! `@timestamp`, `tags`, `@metadata`는 최상위에서 형태가 고정된 필드입니다.
//! 경로 해석기는 이 필드에 들어가거나(`verify_enter`) 값을 대체하기 전에
//! (`verify_set`) 여기서 검증을 받습니다.

use crate::error::EventError;
use crate::event::value::Value;

/// `@timestamp` 필드 키
pub const TIMESTAMP_KEY: &str = "@timestamp";
/// `tags` 필드 키
pub const TAGS_KEY: &str = "tags";
/// `@metadata` 필드 키
pub const METADATA_KEY: &str = "@metadata";

/// 내장 필드가 구현하는 검증 계약
pub trait BuiltinField: Send + Sync {
    /// 필드 이름
    fn key(&self) -> &'static str;

    /// 하위 키 `key`로 진입할 수 있는지 검증합니다.
    fn verify_enter(&self, key: &str) -> Result<(), EventError>;

    /// 필드 전체를 `value`로 대체할 수 있는지 검증하고 저장할 값을 반환합니다.
    fn verify_set(&self, value: Value) -> Result<Value, EventError>;

    /// 필드 삭제는 어떤 내장 필드에도 허용되지 않습니다.
    fn verify_unset(&self) -> Result<(), EventError> {
        Err(builtin_error(
            self.key(),
            format!("Builtin entry '{}' cannot be unset", self.key()),
        ))
    }
}

struct TimestampField;
struct TagsField;
struct MetadataField;

impl BuiltinField for TimestampField {
    fn key(&self) -> &'static str {
        TIMESTAMP_KEY
    }

    fn verify_enter(&self, _key: &str) -> Result<(), EventError> {
        Err(builtin_error(
            TIMESTAMP_KEY,
            "Builtin @timestamp is not a map".to_owned(),
        ))
    }

    fn verify_set(&self, value: Value) -> Result<Value, EventError> {
        match value {
            Value::Timestamp(_) => Ok(value),
            _ => Err(builtin_error(
                TIMESTAMP_KEY,
                "Cannot set builtin @timestamp key to non time value".to_owned(),
            )),
        }
    }
}

impl BuiltinField for TagsField {
    fn key(&self) -> &'static str {
        TAGS_KEY
    }

    fn verify_enter(&self, _key: &str) -> Result<(), EventError> {
        Err(builtin_error(TAGS_KEY, "Builtin tags is not a map".to_owned()))
    }

    fn verify_set(&self, _value: Value) -> Result<Value, EventError> {
        Err(builtin_error(
            TAGS_KEY,
            "Cannot set tags directly, use add_tag or remove_tag actions".to_owned(),
        ))
    }
}

impl BuiltinField for MetadataField {
    fn key(&self) -> &'static str {
        METADATA_KEY
    }

    fn verify_enter(&self, _key: &str) -> Result<(), EventError> {
        Ok(())
    }

    fn verify_set(&self, _value: Value) -> Result<Value, EventError> {
        Err(builtin_error(
            METADATA_KEY,
            "Cannot set @metadata directly, set individual keys instead".to_owned(),
        ))
    }
}

/// 최상위 키에 해당하는 내장 필드를 찾습니다.
pub fn lookup(key: &str) -> Option<&'static dyn BuiltinField> {
    match key {
        TIMESTAMP_KEY => Some(&TimestampField),
        TAGS_KEY => Some(&TagsField),
        METADATA_KEY => Some(&MetadataField),
        _ => None,
    }
}

fn builtin_error(field: &str, reason: String) -> EventError {
    EventError::Builtin {
        field: field.to_owned(),
        reason,
    }
}
