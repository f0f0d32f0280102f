//! 스크립트 구문 트리
//!
//! 파서가 만든 문장 목록입니다. 표현식은 이미 컴파일(상수 접기 포함)된
//! 상태이고, 액션 이름과 인자는 컴파일러가 레지스트리에서 확인합니다.

use crate::expr::Expression;

/// 스크립트 전체
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub statements: Vec<Statement>,
}

/// 문장
#[derive(Debug, Clone)]
pub enum Statement {
    /// `set <path> = <expr>`
    Set {
        path: String,
        value: Expression,
        position: Position,
    },
    /// `unset <path>`
    Unset { path: String, position: Position },
    /// `<action> [name=<expr>, ...]`
    Action {
        name: String,
        arguments: Vec<Argument>,
        position: Position,
    },
    /// `if (...) { } else if (...) { } else { }`
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Statement>>,
        position: Position,
    },
}

/// 조건과 그 조건이 참일 때 실행할 블록
#[derive(Debug, Clone)]
pub struct Branch {
    pub condition: Expression,
    pub body: Vec<Statement>,
}

/// 액션 호출 인자
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub value: Expression,
    pub position: Position,
}

/// 원본 위치 (줄은 1부터, 열은 0부터)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}
