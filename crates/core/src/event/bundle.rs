//! 이벤트 묶음
//!
//! 파이프라인의 처리 단위입니다. 이벤트 목록과 함께 타입별 표식(mark)을
//! 한 개씩 보관할 수 있어, 시퀀서 같은 구성 요소가 묶음에 자기 상태를
//! 붙여 둘 수 있습니다.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use super::Event;

/// 이벤트 묶음
#[derive(Default)]
pub struct Bundle {
    events: Vec<Event>,
    marks: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Bundle {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            marks: HashMap::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    /// 표식을 남긴 채 이벤트 목록을 교체합니다.
    pub fn replace_events(&mut self, events: Vec<Event>) -> Vec<Event> {
        std::mem::replace(&mut self.events, events)
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 타입 `T`의 표식을 붙입니다. 같은 타입의 기존 표식은 대체됩니다.
    pub fn mark<T: Any + Send + Sync>(&mut self, value: T) {
        self.marks.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// 타입 `T`의 표식을 조회합니다.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.marks
            .get(&TypeId::of::<T>())
            .and_then(|mark| mark.downcast_ref::<T>())
    }

    /// 타입 `T`의 표식을 제거하고 반환합니다.
    pub fn take_mark<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.marks
            .remove(&TypeId::of::<T>())
            .and_then(|mark| mark.downcast::<T>().ok())
            .map(|mark| *mark)
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("events", &self.events.len())
            .field("marks", &self.marks.len())
            .finish()
    }
}

impl From<Vec<Event>> for Bundle {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}
