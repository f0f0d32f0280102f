//! 프로세서 에러 타입
//!
//! [`ProcessorError`]는 스크립트 컴파일, grok 라이브러리 로딩, 레거시 변환,
//! 워커 풀 채널 통신에서 발생하는 에러를 표현합니다.
//! `From<ProcessorError> for LogforgeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 이벤트 단위의 실패(액션 에러, 표현식 평가 에러)는 이 타입으로 표현되지
//! 않습니다. 그런 실패는 이벤트에 기록되거나 경고로 남고 처리는 계속됩니다.

use std::fmt;

use logforge_core::error::{ConfigError, LogforgeError, PipelineError};

use crate::grok::GrokError;

/// 컴파일 진단 하나
///
/// `line`은 1부터, `column`은 0부터 셉니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{} {}", self.line, self.column, self.message)
    }
}

/// 프로세서 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// 스크립트 컴파일 실패 (하나 이상의 진단)
    #[error("failed to parse processor pipeline script:\n{}", join_diagnostics(.errors))]
    Compile {
        /// 발견된 모든 진단
        errors: Vec<Diagnostic>,
    },

    /// grok 라이브러리 에러
    #[error("grok error: {0}")]
    Grok(#[from] GrokError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 레거시 설정 변환 실패
    #[error("legacy config error: {reason}")]
    Legacy {
        /// 변환 실패 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessorError {
    /// 진단 하나로 컴파일 에러를 만듭니다.
    pub fn compile(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Compile {
            errors: vec![Diagnostic::new(line, column, message)],
        }
    }

    /// 컴파일 에러의 진단 목록
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Compile { errors } => errors,
            _ => &[],
        }
    }
}

fn join_diagnostics(errors: &[Diagnostic]) -> String {
    errors
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<ProcessorError> for LogforgeError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Config { field, reason } => {
                LogforgeError::Config(ConfigError::InvalidValue { field, reason })
            }
            ProcessorError::Io(e) => LogforgeError::Io(e),
            other => LogforgeError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
