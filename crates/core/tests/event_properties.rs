//! 이벤트 모델 속성 테스트
//!
//! - 경로 set 후 get은 같은 값을 돌려준다
//! - 시퀀서는 임의의 완료 순서에서도 입력 순서로 내보낸다

use logforge_core::event::{Bundle, Event, Map, Sequencer, Value};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}".prop_filter("builtin keys are constrained", |s| s != "tags")
}

proptest! {
    #[test]
    fn set_then_resolve_returns_value(
        segments in prop::collection::vec(segment(), 1..4),
        number in any::<i64>(),
    ) {
        let mut path = segments[0].clone();
        for seg in &segments[1..] {
            path.push('[');
            path.push_str(seg);
            path.push(']');
        }

        let mut event = Event::new(Map::new());
        event.set(&path, number).unwrap();
        prop_assert_eq!(event.resolve(&path).unwrap(), Some(&Value::Int(number)));

        let removed = event.unset(&path).unwrap();
        prop_assert_eq!(removed, Some(Value::Int(number)));
        prop_assert_eq!(event.resolve(&path).unwrap(), None);
    }

    #[test]
    fn sequencer_restores_admission_order(
        order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let mut sequencer = Sequencer::new();
        let mut bundles: Vec<Option<Bundle>> = (0..order.len())
            .map(|index| {
                let mut bundle = Bundle::new(vec![Event::new(Map::new())]);
                bundle.mark(index);
                sequencer.track(&mut bundle);
                Some(bundle)
            })
            .collect();

        let mut emitted = Vec::new();
        for index in order {
            let bundle = bundles[index].take().unwrap();
            for ready in sequencer.enforce(bundle) {
                emitted.push(*ready.value::<usize>().unwrap());
            }
        }

        prop_assert_eq!(emitted, (0..12).collect::<Vec<_>>());
        prop_assert!(sequencer.is_empty());
        prop_assert_eq!(sequencer.delayed(), 0);
    }
}
