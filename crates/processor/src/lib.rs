#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`grok`]: 이름 있는 정규식 패턴 라이브러리와 지연 컴파일
//! - [`expr`]: CEL 호환 표현식 파서/평가기
//! - [`script`]: 처리 스크립트 어휘 분석, 파싱, 컴파일
//! - [`node`]: 실행 가능한 프로그램 (처리 노드 트리)
//! - [`action`]: 액션 레지스트리와 기본 액션 (date, json, kv, grok, geoip, user_agent, 태그)
//! - [`legacy`]: 레거시 중첩 액션 목록 컴파일 및 스크립트 변환
//! - [`pool`]: 워커 풀 (병렬 처리, 순서 복원, 핫 리로드)
//! - [`config`]: 프로세서 설정 (core 설정 해석)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! script ─> lexer ─> parser ─> compiler ─> Program ─┐
//!                                 │                 │
//!                          ActionRegistry           ▼
//! input batches ───────────────────────────────> Pool ─> output batches
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod expr;
pub mod grok;
pub mod legacy;
pub mod node;
pub mod pool;
pub mod script;

// --- 주요 타입 re-export ---

// 설정
pub use config::{ProcessorConfig, ProcessorConfigBuilder};

// 에러
pub use error::{Diagnostic, ProcessorError};

// 프로그램
pub use node::{ProcessNode, Program};
pub use script::compile_script;

// 표현식
pub use expr::Expression;

// 액션
pub use action::{Action, ActionContext, ActionRegistry};

// grok
pub use grok::Grok;

// 레거시
pub use legacy::LegacyCompiler;

// 워커 풀
pub use pool::{Pool, PoolBuilder, PoolChannels};
