//! # proxylog-log-pipeline
//!
//! 외부 로그 프로세스의 출력을 읽어 구조화된 이벤트로 분류합니다.
//!
//! # 모듈 구성
//!
//! - [`parser`]: 3단계 문법 캐스케이드 라인 분류기
//! - [`supervisor`]: 로그 프로세스 실행/재시작/재개 관리
//! - [`process`]: 자식 프로세스와 stdout 파이프 소유 타입
//! - [`config`]: 수퍼바이저 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! LogProcess stdout -> LogStreamSupervisor -> LineClassifier -> mpsc -> sink
//!                         |  restart / backoff / watermark
//! ```

pub mod config;
pub mod error;
pub mod parser;
pub mod process;
pub mod supervisor;

// --- 주요 타입 re-export ---

// 설정
pub use config::{SupervisorConfig, SupervisorConfigBuilder};

// 에러
pub use error::{ClassifyError, ErrorKind, FieldError, FieldErrors, LogPipelineError};

// 분류기
pub use parser::{LineClassifier, Stage};

// 수퍼바이저
pub use process::LogProcess;
pub use supervisor::{LogStreamSupervisor, SupervisorState};
