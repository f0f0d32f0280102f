//! 프로세서 설정
//!
//! [`ProcessorConfig`]는 core의 [`LogforgeConfig`]를 워커 풀이 바로 쓸 수 있는
//! 형태로 해석한 결과입니다. grok 라이브러리를 읽고, 스크립트와 파이프라인을
//! 하나의 [`Program`]으로 컴파일합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logforge_core::LogforgeConfig;
//! use logforge_processor::config::ProcessorConfig;
//!
//! let core_config = LogforgeConfig::load("logforge.toml").await?;
//! let config = ProcessorConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use logforge_core::LogforgeConfig;
use logforge_core::config::{GrokSection, MAX_ROUTINES, PipelineSection};

use crate::action::{ActionContext, ActionRegistry};
use crate::error::ProcessorError;
use crate::expr::Expression;
use crate::grok::Grok;
use crate::legacy::LegacyCompiler;
use crate::node::{ProcessNode, Program};
use crate::script::compile_script;

/// 워커 풀 설정
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// 병렬 워커 수
    pub routines: usize,
    /// 처리된 이벤트를 debug 레벨로 출력
    pub debug_events: bool,
    /// 출력 순서를 입력 순서로 복원
    pub ordered: bool,
    /// 입출력 채널 용량 (배치 단위)
    pub channel_capacity: usize,
    /// 모든 워커가 공유하는 프로그램
    pub program: Arc<Program>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            routines: 4,
            debug_events: false,
            ordered: true,
            channel_capacity: 16,
            program: Arc::new(Program::default()),
        }
    }
}

impl ProcessorConfig {
    /// core 설정으로 프로세서 설정을 만듭니다.
    ///
    /// # Errors
    ///
    /// 패턴 파일이나 스크립트 파일을 읽지 못하거나, 프로그램 컴파일에
    /// 실패하면 에러를 반환합니다.
    pub fn from_core(core: &LogforgeConfig) -> Result<Self, ProcessorError> {
        let ctx = action_context(core)?;
        let registry = ActionRegistry::with_defaults();
        let program = build_program(core, &registry, &ctx)?;

        let config = Self {
            routines: core.processor.routines,
            debug_events: core.processor.debug_events,
            ordered: core.processor.ordered,
            channel_capacity: core.processor.channel_capacity,
            program: Arc::new(program),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if !(1..=MAX_ROUTINES).contains(&self.routines) {
            return Err(ProcessorError::Config {
                field: "routines".to_owned(),
                reason: format!("must be 1-{MAX_ROUTINES}"),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ProcessorError::Config {
                field: "channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// grok 섹션으로 패턴 라이브러리를 만듭니다.
pub fn load_grok(section: &GrokSection) -> Result<Grok, ProcessorError> {
    let mut grok = Grok::new();
    if section.load_defaults {
        grok.load_defaults();
    }
    for path in &section.pattern_files {
        grok.load_patterns_from_file(path)?;
    }

    let missing = grok.missing_patterns();
    if !missing.is_empty() {
        tracing::warn!(
            missing = %missing.join(", "),
            "grok patterns reference undefined patterns and will not be available"
        );
    }
    Ok(grok)
}

/// 액션 생성에 쓰이는 공유 자원을 준비합니다.
pub fn action_context(core: &LogforgeConfig) -> Result<ActionContext, ProcessorError> {
    let configured = |path: &str| Some(path).filter(|p| !p.is_empty()).map(PathBuf::from);
    Ok(ActionContext {
        grok: Arc::new(load_grok(&core.grok)?),
        geoip_database: configured(&core.processor.geoip_database),
        user_agent_definitions: configured(&core.processor.user_agent_definitions),
    })
}

/// 실제로 실행될 프로그램을 컴파일합니다.
///
/// `[processor]` 스크립트가 먼저 오고, 그 뒤에 `[[pipelines]]` 항목이 순서대로
/// 이어집니다. `condition_expr`가 있는 항목은 `if (<condition_expr>) { ... }`로
/// 감싸집니다.
pub fn build_program(
    core: &LogforgeConfig,
    registry: &ActionRegistry,
    ctx: &ActionContext,
) -> Result<Program, ProcessorError> {
    let mut program = match processor_script(core)? {
        Some(source) => compile_script(&source, registry, ctx)?,
        None => Program::default(),
    };

    for (index, pipeline) in core.pipelines.iter().enumerate() {
        let body = compile_pipeline(index, pipeline, registry, ctx)?;
        match &pipeline.condition_expr {
            Some(source) => {
                let condition = Expression::parse(source).map_err(|e| ProcessorError::Config {
                    field: format!("pipelines[{index}].condition_expr"),
                    reason: e.to_string(),
                })?;
                program.push(ProcessNode::conditional(vec![(condition, body)], None));
            }
            None => program.extend(body),
        }
    }
    Ok(program)
}

/// `script` 또는 `script_file`의 내용. 둘 다 비어 있으면 `None`입니다.
fn processor_script(core: &LogforgeConfig) -> Result<Option<String>, ProcessorError> {
    let section = &core.processor;
    if !section.script.is_empty() {
        return Ok(Some(section.script.clone()));
    }
    if section.script_file.is_empty() {
        return Ok(None);
    }
    std::fs::read_to_string(&section.script_file)
        .map(Some)
        .map_err(|e| ProcessorError::Config {
            field: "processor.script_file".to_owned(),
            reason: format!("failed to read '{}': {e}", section.script_file),
        })
}

fn compile_pipeline(
    index: usize,
    pipeline: &PipelineSection,
    registry: &ActionRegistry,
    ctx: &ActionContext,
) -> Result<Program, ProcessorError> {
    if let Some(source) = &pipeline.script {
        return compile_script(source, registry, ctx).map_err(|e| ProcessorError::Config {
            field: format!("pipelines[{index}].script"),
            reason: e.to_string(),
        });
    }
    match &pipeline.actions {
        Some(entries) => {
            tracing::warn!(
                pipeline = index,
                "legacy actions list is deprecated, convert it with --upgrade-legacy"
            );
            LegacyCompiler::new(registry, ctx).compile(entries, &format!("pipelines[{index}].actions"))
        }
        None => Ok(Program::default()),
    }
}

/// 설정 빌더
#[derive(Default)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 워커 수를 설정합니다.
    pub fn routines(mut self, routines: usize) -> Self {
        self.config.routines = routines;
        self
    }

    pub fn debug_events(mut self, enabled: bool) -> Self {
        self.config.debug_events = enabled;
        self
    }

    /// 순서 복원 여부를 설정합니다.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.config.ordered = ordered;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// 실행할 프로그램을 설정합니다.
    pub fn program(mut self, program: Program) -> Self {
        self.config.program = Arc::new(program);
        self
    }

    /// 설정을 검증하고 `ProcessorConfig`를 생성합니다.
    pub fn build(self) -> Result<ProcessorConfig, ProcessorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logforge_core::{Event, Map, Value};
    use std::io::Write;

    fn core(toml: &str) -> LogforgeConfig {
        LogforgeConfig::parse(toml).unwrap()
    }

    fn run(config: &ProcessorConfig, json: serde_json::Value) -> Event {
        let mut event = match Value::from(json) {
            Value::Map(map) => Event::new(map),
            _ => Event::new(Map::new()),
        };
        config.program.execute(&mut event);
        event
    }

    #[test]
    fn default_config_is_valid() {
        ProcessorConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_copies_pool_settings() {
        let config = ProcessorConfig::from_core(&core(
            "[processor]\nroutines = 8\nordered = false\nchannel_capacity = 2\ndebug_events = true\n",
        ))
        .unwrap();
        assert_eq!(config.routines, 8);
        assert!(!config.ordered);
        assert_eq!(config.channel_capacity, 2);
        assert!(config.debug_events);
        assert!(config.program.is_empty());
    }

    #[test]
    fn pipelines_follow_the_processor_script() {
        let config = ProcessorConfig::from_core(&core(
            r#"
[processor]
script = 'set stage = "first"'

[[pipelines]]
condition_expr = 'event.level == "error"'
script = 'add_tag tag="alert"'

[[pipelines]]
script = 'set stage = "last"'
"#,
        ))
        .unwrap();
        assert_eq!(config.program.len(), 3);

        let event = run(&config, serde_json::json!({ "level": "error" }));
        assert!(event.has_tag("alert"));
        assert_eq!(event.resolve("stage").unwrap(), Some(&Value::from("last")));

        let event = run(&config, serde_json::json!({ "level": "info" }));
        assert!(!event.has_tag("alert"));
    }

    #[test]
    fn legacy_actions_are_compiled() {
        let config = ProcessorConfig::from_core(&core(
            r#"
[[pipelines]]
actions = [
  { if = 'event.level == "warn"', then = [{ name = "add_tag", tag = "sev_med" }] },
  { else = [{ name = "add_tag", tag = "sev_low" }] },
]
"#,
        ))
        .unwrap();
        let event = run(&config, serde_json::json!({ "level": "debug" }));
        assert_eq!(event.tags(), vec!["sev_low"]);
    }

    #[test]
    fn script_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "add_tag tag=\"from_file\"").unwrap();
        let toml = format!(
            "[processor]\nscript_file = '{}'\n",
            file.path().display()
        );
        let config = ProcessorConfig::from_core(&core(&toml)).unwrap();
        let event = run(&config, serde_json::json!({}));
        assert!(event.has_tag("from_file"));
    }

    #[test]
    fn missing_script_file_is_a_config_error() {
        let mut config = LogforgeConfig::default();
        config.processor.script_file = "/nonexistent/logforge/script".to_owned();
        let err = ProcessorConfig::from_core(&config).unwrap_err();
        assert!(matches!(err, ProcessorError::Config { ref field, .. } if field == "processor.script_file"));
    }

    #[test]
    fn pipeline_errors_name_the_pipeline() {
        let err = ProcessorConfig::from_core(&core(
            "[[pipelines]]\nscript = 'nope'\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ProcessorError::Config { ref field, .. } if field == "pipelines[0].script"));

        let err = ProcessorConfig::from_core(&core(
            "[[pipelines]]\ncondition_expr = 'event.a =='\nscript = ''\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ProcessorError::Config { ref field, .. } if field == "pipelines[0].condition_expr"));
    }

    #[test]
    fn processor_script_errors_are_compile_errors() {
        let err = ProcessorConfig::from_core(&core("[processor]\nscript = 'unknown_action'\n"))
            .unwrap_err();
        assert_eq!(err.diagnostics().len(), 1);
    }

    #[test]
    fn grok_pattern_files_extend_the_library() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# custom patterns").unwrap();
        writeln!(file, "TICKET [A-Z]+-%{{INT}}").unwrap();
        let section = GrokSection {
            load_defaults: true,
            pattern_files: vec![file.path().display().to_string()],
        };
        let grok = load_grok(&section).unwrap();
        assert!(grok.contains("TICKET"));
        assert!(grok.contains("INT"));
    }

    #[test]
    fn grok_defaults_can_be_skipped() {
        let section = GrokSection {
            load_defaults: false,
            pattern_files: Vec::new(),
        };
        assert!(load_grok(&section).unwrap().is_empty());
    }

    #[test]
    fn geoip_database_is_optional() {
        let ctx = action_context(&LogforgeConfig::default()).unwrap();
        assert!(ctx.geoip_database.is_none());

        let mut config = LogforgeConfig::default();
        config.processor.geoip_database = "/data/GeoLite2-City.mmdb".to_owned();
        let ctx = action_context(&config).unwrap();
        assert_eq!(ctx.geoip_database, Some(PathBuf::from("/data/GeoLite2-City.mmdb")));
    }

    #[test]
    fn user_agent_definitions_are_optional() {
        let ctx = action_context(&LogforgeConfig::default()).unwrap();
        assert!(ctx.user_agent_definitions.is_none());

        let mut config = LogforgeConfig::default();
        config.processor.user_agent_definitions = "/etc/uap/regexes.yaml".to_owned();
        let ctx = action_context(&config).unwrap();
        assert_eq!(
            ctx.user_agent_definitions,
            Some(PathBuf::from("/etc/uap/regexes.yaml"))
        );
    }

    #[test]
    fn builder_rejects_invalid_config() {
        assert!(ProcessorConfigBuilder::new().routines(0).build().is_err());
        assert!(ProcessorConfigBuilder::new().routines(MAX_ROUTINES + 1).build().is_err());
        assert!(ProcessorConfigBuilder::new().channel_capacity(0).build().is_err());
        let config = ProcessorConfigBuilder::new().routines(2).ordered(false).build().unwrap();
        assert_eq!(config.routines, 2);
        assert!(!config.ordered);
    }
}
