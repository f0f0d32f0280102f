//! 순서 보장 시퀀서
//!
//! 병렬로 처리된 묶음을 입력 순서대로 되돌립니다. 입력 시 [`Sequencer::track`]으로
//! 위치를 기록하고, 처리 완료 시 [`Sequencer::enforce`]에 넘기면 앞선 묶음이
//! 모두 끝날 때까지 보류했다가 순서대로 내보냅니다.

use std::collections::BTreeMap;

use super::Bundle;

/// 묶음에 붙는 위치 표식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position(u64);

/// 이미 enforce된 묶음 표식
#[derive(Debug, Clone, Copy)]
struct Enforced;

/// 묶음 순서를 복원하는 시퀀서
#[derive(Debug, Default)]
pub struct Sequencer {
    next: u64,
    cursor: u64,
    delayed: BTreeMap<u64, Bundle>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 묶음에 다음 위치를 기록합니다.
    ///
    /// # Panics
    ///
    /// 이미 추적 중인 묶음을 다시 넘기면 패닉합니다.
    pub fn track(&mut self, bundle: &mut Bundle) {
        if bundle.value::<Position>().is_some() {
            panic!("bundle is already tracked by a sequencer");
        }
        bundle.mark(Position(self.next));
        self.next += 1;
    }

    /// 처리 완료된 묶음을 받아 내보낼 수 있는 묶음들을 순서대로 반환합니다.
    ///
    /// 앞선 묶음이 아직 도착하지 않았으면 빈 목록을 반환하고 묶음을 보류합니다.
    ///
    /// # Panics
    ///
    /// 추적되지 않았거나 이미 enforce된 묶음이면 패닉합니다.
    pub fn enforce(&mut self, mut bundle: Bundle) -> Vec<Bundle> {
        let Some(&Position(position)) = bundle.value::<Position>() else {
            panic!("bundle was not tracked by the sequencer");
        };
        if bundle.value::<Enforced>().is_some() {
            panic!("bundle has already been enforced");
        }
        bundle.mark(Enforced);

        if position != self.cursor {
            self.delayed.insert(position, bundle);
            return Vec::new();
        }

        let mut ready = vec![bundle];
        self.cursor += 1;
        while let Some(next) = self.delayed.remove(&self.cursor) {
            ready.push(next);
            self.cursor += 1;
        }
        ready
    }

    /// 추적되었지만 아직 내보내지 않은 묶음 수
    pub fn len(&self) -> usize {
        usize::try_from(self.next - self.cursor).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.next == self.cursor
    }

    /// 앞선 묶음을 기다리며 보류 중인 묶음 수
    pub fn delayed(&self) -> usize {
        self.delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Map};

    fn bundle(tag: u32) -> Bundle {
        let mut bundle = Bundle::new(vec![Event::new(Map::new())]);
        bundle.mark(tag);
        bundle
    }

    fn tags(bundles: &[Bundle]) -> Vec<u32> {
        bundles.iter().map(|b| *b.value::<u32>().unwrap()).collect()
    }

    #[test]
    fn in_order_completion_passes_through() {
        let mut sequencer = Sequencer::new();
        let mut a = bundle(1);
        let mut b = bundle(2);
        sequencer.track(&mut a);
        sequencer.track(&mut b);
        assert_eq!(sequencer.len(), 2);

        assert_eq!(tags(&sequencer.enforce(a)), vec![1]);
        assert_eq!(tags(&sequencer.enforce(b)), vec![2]);
        assert!(sequencer.is_empty());
    }

    #[test]
    fn out_of_order_completion_is_held_back() {
        let mut sequencer = Sequencer::new();
        let mut bundles: Vec<Bundle> = (1..=3).map(bundle).collect();
        for b in &mut bundles {
            sequencer.track(b);
        }
        let c = bundles.pop().unwrap();
        let b = bundles.pop().unwrap();
        let a = bundles.pop().unwrap();

        assert!(sequencer.enforce(c).is_empty());
        assert!(sequencer.enforce(b).is_empty());
        assert_eq!(sequencer.delayed(), 2);
        assert_eq!(tags(&sequencer.enforce(a)), vec![1, 2, 3]);
        assert_eq!(sequencer.delayed(), 0);
        assert!(sequencer.is_empty());
    }

    #[test]
    #[should_panic(expected = "already tracked")]
    fn tracking_twice_panics() {
        let mut sequencer = Sequencer::new();
        let mut a = bundle(1);
        sequencer.track(&mut a);
        sequencer.track(&mut a);
    }

    #[test]
    #[should_panic(expected = "not tracked")]
    fn enforcing_untracked_panics() {
        let mut sequencer = Sequencer::new();
        sequencer.enforce(bundle(1));
    }

    #[test]
    #[should_panic(expected = "already been enforced")]
    fn enforcing_twice_panics() {
        let mut sequencer = Sequencer::new();
        let mut a = bundle(1);
        let mut b = bundle(2);
        sequencer.track(&mut a);
        sequencer.track(&mut b);
        let mut out = sequencer.enforce(a);
        let again = out.pop().unwrap();
        sequencer.enforce(again);
    }
}
