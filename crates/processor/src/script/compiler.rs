//! 구문 트리를 실행 가능한 [`Program`]으로 낮춥니다.
//!
//! 액션 문장은 [`ActionRegistry`]로 바인딩합니다. 바인딩 실패는 문장 위치의
//! 진단으로 모아 한 번에 보고합니다.

use crate::action::{ActionContext, ActionRegistry};
use crate::error::{Diagnostic, ProcessorError};
use crate::node::{ProcessNode, Program};

use super::ast::{Script, Statement};

/// 스크립트 컴파일러
pub struct Compiler<'a> {
    registry: &'a ActionRegistry,
    ctx: &'a ActionContext,
    errors: Vec<Diagnostic>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a ActionRegistry, ctx: &'a ActionContext) -> Self {
        Self {
            registry,
            ctx,
            errors: Vec::new(),
        }
    }

    /// 스크립트를 컴파일합니다.
    ///
    /// # Errors
    ///
    /// 알 수 없는 액션이나 잘못된 인자가 하나라도 있으면
    /// [`ProcessorError::Compile`]을 반환합니다.
    pub fn compile(mut self, script: &Script) -> Result<Program, ProcessorError> {
        let program = self.block(&script.statements);
        if self.errors.is_empty() {
            Ok(program)
        } else {
            self.errors.sort_by_key(|d| (d.line, d.column));
            Err(ProcessorError::Compile {
                errors: self.errors,
            })
        }
    }

    fn block(&mut self, statements: &[Statement]) -> Program {
        let mut program = Program::default();
        for statement in statements {
            if let Some(node) = self.statement(statement) {
                program.push(node);
            }
        }
        program
    }

    fn statement(&mut self, statement: &Statement) -> Option<ProcessNode> {
        match statement {
            Statement::Set { path, value, .. } => Some(ProcessNode::Set {
                path: path.clone(),
                value: value.clone(),
            }),
            Statement::Unset { path, .. } => Some(ProcessNode::Unset { path: path.clone() }),
            Statement::Action {
                name,
                arguments,
                position,
            } => {
                let provided: Vec<(&str, &crate::expr::Expression)> = arguments
                    .iter()
                    .map(|argument| (argument.name.as_str(), &argument.value))
                    .collect();
                match self.registry.bind(name, &provided, self.ctx) {
                    Ok(call) => Some(ProcessNode::action(call)),
                    Err(e) => {
                        self.errors
                            .push(Diagnostic::new(position.line, position.column, e.to_string()));
                        None
                    }
                }
            }
            Statement::If {
                branches,
                otherwise,
                ..
            } => {
                let branches = branches
                    .iter()
                    .map(|branch| (branch.condition.clone(), self.block(&branch.body)))
                    .collect();
                let otherwise = otherwise.as_ref().map(|body| self.block(body));
                Some(ProcessNode::conditional(branches, otherwise))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::compile_script;
    use logforge_core::{Event, Map, Value};

    fn compile(source: &str) -> Result<Program, ProcessorError> {
        compile_script(source, &ActionRegistry::with_defaults(), &ActionContext::default())
    }

    fn run(program: &Program, json: serde_json::Value) -> Event {
        let mut event = match Value::from(json) {
            Value::Map(map) => Event::new(map),
            _ => Event::new(Map::new()),
        };
        program.execute(&mut event);
        event
    }

    #[test]
    fn compiles_statements_in_order() {
        let program = compile(
            "set a = 1\nset b = event.a\nadd_tag tag=\"seen\"\nunset a",
        )
        .unwrap();
        assert_eq!(program.len(), 4);
        let event = run(&program, serde_json::json!({}));
        assert_eq!(event.resolve("b").unwrap(), Some(&Value::Int(1)));
        assert_eq!(event.resolve("a").unwrap(), None);
        assert!(event.has_tag("seen"));
    }

    #[test]
    fn static_and_dynamic_actions_are_distinguished() {
        let program = compile("add_tag tag=\"x\"\nadd_tag tag=event.kind").unwrap();
        assert!(matches!(program.nodes()[0], ProcessNode::ActionStatic(_)));
        assert!(matches!(program.nodes()[1], ProcessNode::Action(_)));

        let event = run(&program, serde_json::json!({"kind": "dyn"}));
        assert!(event.has_tag("x"));
        assert!(event.has_tag("dyn"));
    }

    #[test]
    fn reports_every_binding_error_with_position() {
        let err = compile("nope\nadd_tag\n  add_tag tag=\"a\", extra=1").unwrap_err();
        let messages: Vec<String> = err.diagnostics().iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "line 1:0 unknown action: nope",
                "line 2:0 invalid arguments to add_tag: missing required arguments: tag",
                "line 3:2 invalid arguments to add_tag: unknown arguments: extra",
            ]
        );
    }

    #[test]
    fn binding_errors_inside_blocks_are_reported() {
        let err = compile("if (true) {\n  missing_action\n}").unwrap_err();
        assert_eq!(err.diagnostics()[0].to_string(), "line 2:2 unknown action: missing_action");
    }

    #[test]
    fn if_chain_selects_branch() {
        let program = compile(
            r#"if (event.level == "error") { add_tag tag="sev_high"; } else if (event.level == "warn") { add_tag tag="sev_med"; } else { add_tag tag="sev_low"; }"#,
        )
        .unwrap();
        for (level, tag) in [("error", "sev_high"), ("warn", "sev_med"), ("info", "sev_low")] {
            let event = run(&program, serde_json::json!({ "level": level }));
            assert_eq!(event.tags(), vec![tag]);
        }
    }

    #[test]
    fn parse_errors_surface_before_binding() {
        let err = compile("set = 1").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse processor pipeline script:"));
    }
}
