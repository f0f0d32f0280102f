//! 레거시 중첩 액션 목록
//!
//! 이전 설정 형식은 파이프라인을 객체 목록으로 표현합니다.
//!
//! ```toml
//! actions = [
//!   { name = "json", field = "message" },
//!   { if = 'event.level == "error"', then = [{ name = "add_tag", tag = "sev_high" }] },
//!   { "else if" = 'event.level == "warn"', then = [{ name = "add_tag", tag = "sev_med" }] },
//!   { else = [{ name = "add_tag", tag = "sev_low" }] },
//! ]
//! ```
//!
//! `name`이 있는 항목은 액션이고, `if` 항목 뒤에 이어지는 `else if`/`else`
//! 항목은 하나의 조건문으로 묶입니다. 이 목록은 두 가지 방법으로 처리됩니다.
//!
//! - [`LegacyCompiler::compile`]: 곧바로 [`Program`]으로 컴파일
//! - [`LegacyCompiler::upgrade`]: 동등한 스크립트 텍스트로 변환한 뒤 다시
//!   컴파일해 검증
//!
//! 두 경로의 실행 결과는 같습니다.

use std::fmt::{self, Write as _};

use logforge_core::Value;
use logforge_core::config::LegacyEntry;

use crate::action::{ActionContext, ActionRegistry};
use crate::error::ProcessorError;
use crate::expr::Expression;
use crate::node::{ProcessNode, Program};
use crate::script::compile_script;

const INDENT: &str = "    ";

/// 항목 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Action,
    If,
    ElseIf,
    Else,
}

impl Token {
    fn of(entry: &LegacyEntry) -> Self {
        if entry.contains_key("if") {
            Self::If
        } else if entry.contains_key("else if") {
            Self::ElseIf
        } else if entry.contains_key("else") {
            Self::Else
        } else {
            Self::Action
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Action => "action",
            Self::If => "if",
            Self::ElseIf => "else if",
            Self::Else => "else",
        })
    }
}

/// 경로가 붙은 항목
#[derive(Debug, Clone, Copy)]
struct Located<'a> {
    entry: &'a LegacyEntry,
    path: &'a str,
}

/// 묶음 단위 항목
#[derive(Debug)]
enum Item<'a> {
    Action(Located<'a>),
    Chain {
        first: Located<'a>,
        rest: Vec<Located<'a>>,
        otherwise: Option<Located<'a>>,
    },
}

/// 항목 목록을 액션과 조건문 묶음으로 나눕니다.
///
/// `paths[i]`는 `entries[i]`의 오류 보고용 경로입니다.
fn group<'a>(
    entries: &'a [LegacyEntry],
    paths: &'a [String],
) -> Result<Vec<Item<'a>>, ProcessorError> {
    let mut items = Vec::new();
    let mut chain: Option<Item<'a>> = None;

    for (entry, path) in entries.iter().zip(paths) {
        let located = Located { entry, path };
        let token = Token::of(entry);

        if let Some(Item::Chain {
            rest, otherwise, ..
        }) = chain.as_mut()
        {
            match token {
                Token::ElseIf if otherwise.is_none() => {
                    rest.push(located);
                    continue;
                }
                Token::Else if otherwise.is_none() => {
                    *otherwise = Some(located);
                    continue;
                }
                _ => {}
            }
        }
        items.extend(chain.take());

        match token {
            Token::Action => items.push(Item::Action(located)),
            Token::If => {
                chain = Some(Item::Chain {
                    first: located,
                    rest: Vec::new(),
                    otherwise: None,
                });
            }
            Token::ElseIf | Token::Else => {
                return Err(legacy(format!("Unexpected '{token}' at {path}")));
            }
        }
    }
    items.extend(chain);
    Ok(items)
}

fn legacy(reason: String) -> ProcessorError {
    ProcessorError::Legacy { reason }
}

fn paths(root: &str, len: usize) -> Vec<String> {
    (0..len).map(|i| format!("{root}[{i}]/")).collect()
}

fn action_name<'a>(located: &Located<'a>) -> Result<&'a str, ProcessorError> {
    located
        .entry
        .get("name")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| legacy(format!("invalid or missing 'name' at {}", located.path)))
}

fn condition<'a>(located: &Located<'a>, key: &str) -> Result<&'a str, ProcessorError> {
    located
        .entry
        .get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            legacy(format!(
                "invalid or missing '{key}' condition at {}",
                located.path
            ))
        })
}

/// 중첩 블록의 항목 목록을 꺼냅니다.
fn block(located: &Located<'_>, key: &str) -> Result<Vec<LegacyEntry>, ProcessorError> {
    let missing = || legacy(format!("invalid or missing '{key}' block at {}", located.path));
    let items = located
        .entry
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(missing)?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_object().cloned().ok_or_else(|| {
                legacy(format!(
                    "invalid block item at {}{key}[{i}]/: expected an object",
                    located.path
                ))
            })
        })
        .collect()
}

/// 레거시 목록 컴파일러
pub struct LegacyCompiler<'a> {
    registry: &'a ActionRegistry,
    ctx: &'a ActionContext,
}

impl<'a> LegacyCompiler<'a> {
    pub fn new(registry: &'a ActionRegistry, ctx: &'a ActionContext) -> Self {
        Self { registry, ctx }
    }

    /// 목록을 곧바로 프로그램으로 컴파일합니다.
    ///
    /// `root`는 오류 메시지에 쓰이는 목록의 위치입니다 (예: `pipelines`).
    pub fn compile(&self, entries: &[LegacyEntry], root: &str) -> Result<Program, ProcessorError> {
        let paths = paths(root, entries.len());
        let mut program = Program::default();
        for item in group(entries, &paths)? {
            program.push(self.compile_item(&item)?);
        }
        Ok(program)
    }

    fn compile_item(&self, item: &Item<'_>) -> Result<ProcessNode, ProcessorError> {
        match item {
            Item::Action(located) => self.bind(located).map(ProcessNode::action),
            Item::Chain {
                first,
                rest,
                otherwise,
            } => {
                let mut branches = vec![self.compile_branch(first, "if")?];
                for located in rest {
                    branches.push(self.compile_branch(located, "else if")?);
                }
                let otherwise = otherwise
                    .as_ref()
                    .map(|located| self.compile_block(located, "else"))
                    .transpose()?;
                Ok(ProcessNode::conditional(branches, otherwise))
            }
        }
    }

    fn compile_branch(
        &self,
        located: &Located<'_>,
        key: &str,
    ) -> Result<(Expression, Program), ProcessorError> {
        let source = condition(located, key)?;
        let expression = Expression::parse(source).map_err(|e| {
            legacy(format!(
                "Condition failed to parse at {}: [{source}] -> {e}",
                located.path
            ))
        })?;
        Ok((expression, self.compile_block(located, "then")?))
    }

    fn compile_block(&self, located: &Located<'_>, key: &str) -> Result<Program, ProcessorError> {
        let entries = block(located, key)?;
        self.compile(&entries, &format!("{}{key}", located.path))
    }

    /// 액션 항목을 상수 인자로 바인딩합니다.
    fn bind(&self, located: &Located<'_>) -> Result<crate::action::ActionCall, ProcessorError> {
        let name = action_name(located)?;
        let values: Vec<(&str, Expression)> = located
            .entry
            .iter()
            .filter(|(key, _)| key.as_str() != "name")
            .map(|(key, value)| (key.as_str(), Expression::literal(Value::from(value.clone()))))
            .collect();
        let provided: Vec<(&str, &Expression)> =
            values.iter().map(|(key, value)| (*key, value)).collect();
        self.registry
            .bind(name, &provided, self.ctx)
            .map_err(|e| {
                legacy(format!(
                    "invalid parameters for action '{name}' at {}: {e}",
                    located.path
                ))
            })
    }

    /// 목록을 동등한 스크립트로 변환합니다.
    ///
    /// 결과 스크립트는 반환 전에 컴파일해 검증합니다.
    pub fn upgrade(&self, entries: &[LegacyEntry], root: &str) -> Result<String, ProcessorError> {
        let mut out = String::new();
        self.write_statements(&mut out, entries, root, "", true)?;
        compile_script(&out, self.registry, self.ctx).map_err(|e| {
            legacy(format!("compiled script validation failed: {e}"))
        })?;
        Ok(out)
    }

    fn write_statements(
        &self,
        out: &mut String,
        entries: &[LegacyEntry],
        root: &str,
        indent: &str,
        spacing: bool,
    ) -> Result<(), ProcessorError> {
        let paths = paths(root, entries.len());
        let items = group(entries, &paths)?;
        let count = items.len();
        for (index, item) in items.iter().enumerate() {
            match item {
                Item::Action(located) => {
                    out.push_str(indent);
                    self.write_action(out, located, indent)?;
                    out.push_str(";\n");
                }
                Item::Chain {
                    first,
                    rest,
                    otherwise,
                } => {
                    self.write_branch(out, first, "if", indent)?;
                    for located in rest {
                        self.write_branch(out, located, "else if", indent)?;
                    }
                    if let Some(located) = otherwise {
                        out.push_str(indent);
                        out.push_str("else {\n");
                        self.write_block(out, located, "else", indent)?;
                        out.push_str(indent);
                        out.push_str("}\n");
                    }
                    if spacing && index + 1 < count {
                        out.push('\n');
                    }
                }
            }
        }
        Ok(())
    }

    fn write_branch(
        &self,
        out: &mut String,
        located: &Located<'_>,
        key: &str,
        indent: &str,
    ) -> Result<(), ProcessorError> {
        let source = condition(located, key)?;
        out.push_str(indent);
        out.push_str(key);
        out.push_str(" (");
        out.push_str(source);
        out.push_str(") {\n");
        self.write_block(out, located, "then", indent)?;
        out.push_str(indent);
        out.push_str("}\n");
        Ok(())
    }

    fn write_block(
        &self,
        out: &mut String,
        located: &Located<'_>,
        key: &str,
        indent: &str,
    ) -> Result<(), ProcessorError> {
        let entries = block(located, key)?;
        let nested = format!("{indent}{INDENT}");
        self.write_statements(out, &entries, &format!("{}{key}", located.path), &nested, false)
    }

    fn write_action(
        &self,
        out: &mut String,
        located: &Located<'_>,
        indent: &str,
    ) -> Result<(), ProcessorError> {
        let name = action_name(located)?;
        self.bind(located)?;

        out.push_str(name);
        let mut keys: Vec<&String> = located.entry.keys().filter(|key| *key != "name").collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i == 0 {
                out.push(' ');
            } else {
                out.push_str(",\n");
                out.push_str(indent);
                out.push_str(INDENT);
            }
            out.push_str(key);
            out.push('=');
            if let Some(value) = located.entry.get(*key) {
                write_value(out, value, indent).map_err(|kind| {
                    legacy(format!(
                        "unsupported value type {kind} for '{key}' at {}",
                        located.path
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// 인자 값을 스크립트 리터럴로 씁니다. 실패 시 지원하지 않는 값의 종류를 반환합니다.
fn write_value(
    out: &mut String,
    value: &serde_json::Value,
    indent: &str,
) -> Result<(), &'static str> {
    match value {
        serde_json::Value::String(s) => quote(out, s),
        serde_json::Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = write!(out, "{i}");
            } else if let Some(u) = n.as_u64() {
                let _ = write!(out, "{u}u");
            } else {
                let f = n.as_f64().unwrap_or_default();
                if f.fract() == 0.0 && f.is_finite() {
                    let _ = write!(out, "{f:.1}");
                } else {
                    let _ = write!(out, "{f}");
                }
            }
        }
        serde_json::Value::Array(items) if !items.is_empty() && items.iter().all(|i| i.is_string()) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(",\n");
                }
                out.push_str(indent);
                out.push_str(INDENT);
                write_value(out, item, indent)?;
            }
            out.push('\n');
            out.push_str(indent);
            out.push(']');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, indent)?;
            }
            out.push(']');
        }
        serde_json::Value::Null => return Err("null"),
        serde_json::Value::Object(_) => return Err("object"),
    }
    Ok(())
}

/// 문자열을 큰따옴표 리터럴로 씁니다.
fn quote(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let code = u32::from(c);
                if code <= 0xFFFF {
                    let _ = write!(out, "\\u{code:04x}");
                } else {
                    let _ = write!(out, "\\U{code:08x}");
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
