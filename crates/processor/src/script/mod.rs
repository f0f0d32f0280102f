//! 처리 스크립트 언어
//!
//! [`lexer`] → [`parser`] → [`compiler`] 순서로 원본 텍스트를 [`Program`]으로
//! 바꿉니다. 각 단계의 오류는 모두 [`ProcessorError::Compile`] 진단으로
//! 보고됩니다.

pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod parser;

use crate::action::{ActionContext, ActionRegistry};
use crate::error::ProcessorError;
use crate::node::Program;

pub use compiler::Compiler;
pub use parser::parse_script;

/// 스크립트 원본을 파싱하고 컴파일합니다.
///
/// # Errors
///
/// 구문 오류가 있으면 구문 진단만, 구문이 올바르면 바인딩 진단을 반환합니다.
pub fn compile_script(
    source: &str,
    registry: &ActionRegistry,
    ctx: &ActionContext,
) -> Result<Program, ProcessorError> {
    let script = parse_script(source)?;
    Compiler::new(registry, ctx).compile(&script)
}
