//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logforge_`
//! - 모듈명: `processor_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logforge_core::metrics::PROCESSOR_EVENTS_PROCESSED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 액션 이름 레이블 키 (date, grok, kv, ...)
pub const LABEL_ACTION: &str = "action";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Processor 메트릭 ──────────────────────────────────────────────

/// Processor: 처리된 배치 수 (counter)
pub const PROCESSOR_BATCHES_PROCESSED_TOTAL: &str = "logforge_processor_batches_processed_total";

/// Processor: 처리된 이벤트 수 (counter)
pub const PROCESSOR_EVENTS_PROCESSED_TOTAL: &str = "logforge_processor_events_processed_total";

/// Processor: 배치 처리 시간 (histogram, 초)
pub const PROCESSOR_BATCH_DURATION_SECONDS: &str = "logforge_processor_batch_duration_seconds";

/// Processor: 액션 실패 수 (counter, label: action)
pub const PROCESSOR_ACTION_FAILURES_TOTAL: &str = "logforge_processor_action_failures_total";

/// Processor: 식 평가 실패 수 (counter)
pub const PROCESSOR_EXPRESSION_FAILURES_TOTAL: &str =
    "logforge_processor_expression_failures_total";

/// Processor: 프로그램 리로드 수 (counter, label: result)
pub const PROCESSOR_RELOADS_TOTAL: &str = "logforge_processor_reloads_total";

/// Processor: 현재 워커 수 (gauge)
pub const PROCESSOR_ROUTINES: &str = "logforge_processor_routines";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logforge_daemon_uptime_seconds";

/// Daemon: 디코딩에 실패한 입력 줄 수 (counter)
pub const DAEMON_DECODE_ERRORS_TOTAL: &str = "logforge_daemon_decode_errors_total";

/// Daemon: 빌드 정보 (gauge, 항상 1)
pub const DAEMON_BUILD_INFO: &str = "logforge_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 배치 처리 시간 버킷 (초)
pub const BATCH_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 후 한 번 호출합니다. 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Processor
    describe_counter!(
        PROCESSOR_BATCHES_PROCESSED_TOTAL,
        "Total number of event batches processed by the worker pool"
    );
    describe_counter!(
        PROCESSOR_EVENTS_PROCESSED_TOTAL,
        "Total number of events processed by the worker pool"
    );
    describe_histogram!(
        PROCESSOR_BATCH_DURATION_SECONDS,
        "Time to run the program over a single batch in seconds"
    );
    describe_counter!(
        PROCESSOR_ACTION_FAILURES_TOTAL,
        "Total number of action failures recorded on events"
    );
    describe_counter!(
        PROCESSOR_EXPRESSION_FAILURES_TOTAL,
        "Total number of expression evaluation failures"
    );
    describe_counter!(
        PROCESSOR_RELOADS_TOTAL,
        "Total number of program reloads applied to the worker pool"
    );
    describe_gauge!(PROCESSOR_ROUTINES, "Number of running pool workers");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logforge daemon uptime in seconds");
    describe_counter!(
        DAEMON_DECODE_ERRORS_TOTAL,
        "Total number of input lines that could not be decoded into events"
    );
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1)");
}
