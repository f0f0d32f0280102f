#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod stream;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, EventError, LogforgeError, PipelineError};

// 설정
pub use config::LogforgeConfig;

// 이벤트
pub use event::{Acknowledger, Bundle, Event, Map, Pattern, Sequencer, Value, dispatch_ack};

// 스트림
pub use stream::StreamDecorator;
