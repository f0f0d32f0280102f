//! 설정 관리 -- logforge.toml 파싱 및 런타임 설정
//!
//! [`LogforgeConfig`]는 데몬과 프로세서가 공유하는 최상위 설정 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGFORGE_PROCESSOR_ROUTINES=8` 형식)
//! 3. 설정 파일 (`logforge.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logforge_core::error::LogforgeError> {
//! use logforge_core::config::LogforgeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogforgeConfig::load("logforge.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogforgeConfig::parse("[processor]\nroutines = 8")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogforgeError};

/// 워커 수 상한
pub const MAX_ROUTINES: usize = 128;

/// 레거시 액션 항목 (`name` 키와 인자들로 이루어진 객체)
pub type LegacyEntry = serde_json::Map<String, serde_json::Value>;

/// logforge 통합 설정
///
/// `logforge.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogforgeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 입력 배치 설정
    #[serde(default)]
    pub input: InputConfig,
    /// 프로세서 설정
    #[serde(default)]
    pub processor: ProcessorSection,
    /// 조건부 파이프라인 목록 (순서대로 적용)
    #[serde(default)]
    pub pipelines: Vec<PipelineSection>,
    /// grok 패턴 라이브러리 설정
    #[serde(default)]
    pub grok: GrokSection,
    /// 스트림 장식 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LogforgeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogforgeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogforgeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogforgeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogforgeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogforgeError> {
        toml::from_str(toml_str).map_err(|e| {
            LogforgeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGFORGE_{SECTION}_{FIELD}`
    /// 예: `LOGFORGE_PROCESSOR_ROUTINES=8`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGFORGE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGFORGE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.host, "LOGFORGE_GENERAL_HOST");

        // Input
        override_usize(&mut self.input.batch_size, "LOGFORGE_INPUT_BATCH_SIZE");
        override_u64(
            &mut self.input.flush_interval_ms,
            "LOGFORGE_INPUT_FLUSH_INTERVAL_MS",
        );

        // Processor
        override_usize(&mut self.processor.routines, "LOGFORGE_PROCESSOR_ROUTINES");
        override_bool(
            &mut self.processor.debug_events,
            "LOGFORGE_PROCESSOR_DEBUG_EVENTS",
        );
        override_bool(&mut self.processor.ordered, "LOGFORGE_PROCESSOR_ORDERED");
        override_usize(
            &mut self.processor.channel_capacity,
            "LOGFORGE_PROCESSOR_CHANNEL_CAPACITY",
        );
        override_string(
            &mut self.processor.script_file,
            "LOGFORGE_PROCESSOR_SCRIPT_FILE",
        );
        override_string(
            &mut self.processor.geoip_database,
            "LOGFORGE_PROCESSOR_GEOIP_DATABASE",
        );
        override_string(
            &mut self.processor.user_agent_definitions,
            "LOGFORGE_PROCESSOR_USER_AGENT_DEFINITIONS",
        );

        // Grok
        override_bool(&mut self.grok.load_defaults, "LOGFORGE_GROK_LOAD_DEFAULTS");
        override_csv(&mut self.grok.pattern_files, "LOGFORGE_GROK_PATTERN_FILES");

        // Stream
        override_bool(
            &mut self.stream.add_host_field,
            "LOGFORGE_STREAM_ADD_HOST_FIELD",
        );
        override_bool(
            &mut self.stream.add_timezone_field,
            "LOGFORGE_STREAM_ADD_TIMEZONE_FIELD",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGFORGE_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGFORGE_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGFORGE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogforgeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.input.batch_size == 0 {
            return Err(invalid("input.batch_size", "must be at least 1".to_owned()));
        }

        if !(1..=MAX_ROUTINES).contains(&self.processor.routines) {
            return Err(invalid(
                "processor.routines",
                format!("must be between 1 and {MAX_ROUTINES}"),
            ));
        }

        if self.processor.channel_capacity == 0 {
            return Err(invalid(
                "processor.channel_capacity",
                "must be at least 1".to_owned(),
            ));
        }

        if !self.processor.script.is_empty() && !self.processor.script_file.is_empty() {
            return Err(invalid(
                "processor.script",
                "script and script_file are mutually exclusive".to_owned(),
            ));
        }

        for (index, pipeline) in self.pipelines.iter().enumerate() {
            if pipeline.script.is_some() == pipeline.actions.is_some() {
                return Err(invalid(
                    &format!("pipelines[{index}]"),
                    "exactly one of script or actions must be given".to_owned(),
                ));
            }
            if pipeline
                .condition_expr
                .as_deref()
                .is_some_and(|expr| expr.trim().is_empty())
            {
                return Err(invalid(
                    &format!("pipelines[{index}].condition_expr"),
                    "must not be empty".to_owned(),
                ));
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid(
                "metrics.port",
                "must not be 0 when metrics are enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> LogforgeError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 이벤트의 `host` 필드 값
    pub host: String,
    /// 모든 이벤트에 추가되는 필드
    pub global_fields: serde_json::Map<String, serde_json::Value>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned()),
            global_fields: serde_json::Map::new(),
        }
    }
}

/// 입력 배치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// 배치 최대 이벤트 수
    pub batch_size: usize,
    /// 배치 플러시 간격 (밀리초)
    pub flush_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 200,
        }
    }
}

/// 프로세서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSection {
    /// 병렬 워커 수 (1..=128)
    pub routines: usize,
    /// 처리된 이벤트를 debug 레벨로 출력
    pub debug_events: bool,
    /// 입력 순서 보장 여부
    pub ordered: bool,
    /// 입출력 배치 채널 용량
    pub channel_capacity: usize,
    /// 처리 스크립트
    pub script: String,
    /// 처리 스크립트 파일 경로 (`script`와 배타적)
    pub script_file: String,
    /// `geoip` 액션의 기본 데이터베이스 경로
    pub geoip_database: String,
    /// `user_agent` 액션의 기본 규칙 파일 (uap-core `regexes.yaml` 형식).
    /// 비어 있으면 번들된 규칙을 씁니다.
    pub user_agent_definitions: String,
}

impl Default for ProcessorSection {
    fn default() -> Self {
        Self {
            routines: 4,
            debug_events: false,
            ordered: true,
            channel_capacity: 16,
            script: String::new(),
            script_file: String::new(),
            geoip_database: String::new(),
            user_agent_definitions: String::new(),
        }
    }
}

/// 조건부 파이프라인
///
/// `condition_expr`가 있으면 `if (<condition_expr>) { ... }`와 동일하게 동작합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 파이프라인 적용 조건 식
    pub condition_expr: Option<String>,
    /// 처리 스크립트
    pub script: Option<String>,
    /// 레거시 중첩 액션 목록 (로드 시 스크립트로 변환)
    pub actions: Option<Vec<LegacyEntry>>,
}

/// grok 패턴 라이브러리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrokSection {
    /// 내장 패턴 로드 여부
    pub load_defaults: bool,
    /// 추가 패턴 파일 목록
    pub pattern_files: Vec<String>,
}

impl Default for GrokSection {
    fn default() -> Self {
        Self {
            load_defaults: true,
            pattern_files: Vec::new(),
        }
    }
}

/// 스트림 장식 설정
///
/// 입력에서 만들어진 이벤트가 풀에 들어가기 전에 붙는 필드를 정합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// `host` 필드 추가
    pub add_host_field: bool,
    /// `timezone` 필드 추가
    pub add_timezone_field: bool,
    /// 스트림 고정 필드
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            add_host_field: true,
            add_timezone_field: false,
            fields: serde_json::Map::new(),
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, kind: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                kind,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
