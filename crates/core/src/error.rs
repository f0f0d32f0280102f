//! 에러 타입 -- 도메인별 에러 정의

/// logforge 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogforgeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 이벤트 필드 접근 에러
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 이벤트 필드 경로 해석 에러
///
/// 경로 문법 오류와 내장 필드(`@timestamp`, `tags`, `@metadata`)의
/// 형태 제약 위반을 표현합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// 잘못된 필드 경로
    #[error("Invalid field: {path}")]
    InvalidPath { path: String },

    /// 내장 필드 제약 위반
    #[error("{reason}")]
    Builtin { field: String, reason: String },

    /// 이벤트 디코딩 실패
    #[error("failed to decode event: {reason}")]
    Decode { reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,
}
