//! `add_tag` / `remove_tag`

use logforge_core::Event;

use super::{Action, ActionError, ArgumentKind, ArgumentSpec, Arguments};

static ARGUMENTS: [ArgumentSpec; 1] = [ArgumentSpec::required("tag", ArgumentKind::String)];

const TAG: usize = 0;

/// 태그를 추가합니다. 이미 있으면 아무것도 하지 않습니다.
#[derive(Debug)]
pub struct AddTagAction;

impl Action for AddTagAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        if let Some(tag) = arguments.string(TAG) {
            event.add_tag(tag);
        }
        Ok(())
    }
}

/// 태그를 제거합니다.
#[derive(Debug)]
pub struct RemoveTagAction;

impl Action for RemoveTagAction {
    fn arguments(&self) -> &'static [ArgumentSpec] {
        &ARGUMENTS
    }

    fn process(&self, event: &mut Event, arguments: &Arguments) -> Result<(), ActionError> {
        if let Some(tag) = arguments.string(TAG) {
            event.remove_tag(tag);
        }
        Ok(())
    }
}
