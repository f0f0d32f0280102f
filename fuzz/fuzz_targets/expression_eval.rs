#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use logforge_core::{Map, Value};
use logforge_processor::Expression;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 표현식 소스
    source: String,
    /// `event.<key>`로 보이는 필드들 (최대 8개 사용)
    fields: Vec<(String, FuzzValue)>,
}

#[derive(Arbitrary, Debug)]
enum FuzzValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl From<FuzzValue> for Value {
    fn from(value: FuzzValue) -> Self {
        match value {
            FuzzValue::Str(s) => Value::String(s),
            FuzzValue::Int(i) => Value::Int(i),
            FuzzValue::Float(f) => Value::Float(f),
            FuzzValue::Bool(b) => Value::Bool(b),
            FuzzValue::List(items) => Value::List(items.into_iter().map(Value::String).collect()),
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let Ok(expression) = Expression::parse(&input.source) else {
        return;
    };
    let mut data = Map::new();
    for (key, value) in input.fields.into_iter().take(8) {
        data.insert(key, value.into());
    }
    let _ = expression.evaluate(&data);
});
