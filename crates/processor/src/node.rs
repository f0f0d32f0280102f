//! 실행 가능한 프로그램
//!
//! 컴파일러는 스크립트를 [`ProcessNode`] 트리로 낮춥니다. 노드는 이벤트를
//! 제자리에서 변경하며 실패해도 처리를 멈추지 않습니다. 표현식 실패는
//! 경고로, 액션 실패는 이벤트의 에러 필드/태그로 남습니다.

use logforge_core::Event;

use crate::action::ActionCall;
use crate::expr::Expression;

/// 프로그램을 이루는 노드
#[derive(Debug, Clone)]
pub enum ProcessNode {
    /// 아무것도 하지 않음 (항상 거짓인 조건문 등)
    Noop,

    /// `set <path> = <expr>`. 값이 null이면 아무것도 하지 않습니다.
    Set { path: String, value: Expression },

    /// `unset <path>`
    Unset { path: String },

    /// `if / else if / else` 연쇄
    If {
        branches: Vec<(Expression, Program)>,
        otherwise: Option<Program>,
    },

    /// 이벤트마다 평가되는 인자가 있는 액션
    Action(ActionCall),

    /// 모든 인자가 상수인 액션. 인자 벡터를 호출 간에 공유합니다.
    ActionStatic(ActionCall),
}

impl ProcessNode {
    /// 바인딩된 호출을 알맞은 노드로 감쌉니다.
    pub fn action(call: ActionCall) -> Self {
        if call.is_static() {
            Self::ActionStatic(call)
        } else {
            Self::Action(call)
        }
    }

    /// 조건문 노드를 만듭니다. 모든 조건이 상수 거짓이고 `else`가 없으면
    /// [`ProcessNode::Noop`]이 됩니다.
    pub fn conditional(branches: Vec<(Expression, Program)>, otherwise: Option<Program>) -> Self {
        let always_false = branches
            .iter()
            .all(|(condition, _)| condition.as_literal() == Some(&logforge_core::Value::Bool(false)));
        if always_false && otherwise.is_none() {
            return Self::Noop;
        }
        Self::If {
            branches,
            otherwise,
        }
    }

    pub fn execute(&self, event: &mut Event) {
        match self {
            Self::Noop => {}
            Self::Set { path, value } => {
                let value = value.value(event);
                if value.is_null() {
                    return;
                }
                if let Err(e) = event.set(path, value) {
                    tracing::warn!(path = %path, error = %e, "failed to set field");
                }
            }
            Self::Unset { path } => {
                if let Err(e) = event.unset(path) {
                    tracing::warn!(path = %path, error = %e, "failed to unset field");
                }
            }
            Self::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if condition.is_true(event) {
                        body.execute(event);
                        return;
                    }
                }
                if let Some(body) = otherwise {
                    body.execute(event);
                }
            }
            Self::Action(call) | Self::ActionStatic(call) => call.execute(event),
        }
    }
}

/// 순서대로 실행되는 노드 목록
#[derive(Debug, Clone, Default)]
pub struct Program {
    nodes: Vec<ProcessNode>,
}

impl Program {
    pub fn new(nodes: Vec<ProcessNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[ProcessNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 다른 프로그램의 노드를 뒤에 이어 붙입니다.
    pub fn extend(&mut self, other: Program) {
        self.nodes.extend(other.nodes);
    }

    pub fn push(&mut self, node: ProcessNode) {
        self.nodes.push(node);
    }

    /// 이벤트 하나에 프로그램을 실행합니다.
    pub fn execute(&self, event: &mut Event) {
        for node in &self.nodes {
            node.execute(event);
        }
    }
}
