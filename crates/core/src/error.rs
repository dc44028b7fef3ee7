//! 에러 타입 — 도메인별 에러 정의

/// proxylog 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ProxylogError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 로그 라인 분류 에러
    #[error("parse error: {0}")]
    Parse(String),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 외부 프로세스 에러
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

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

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,
}

/// 스토리지 에러
///
/// 스케줄러는 이 에러를 "아직 실행 시점 아님"으로 취급하고 다음 tick에 재시도하며,
/// 캐시는 트랜잭션을 롤백한 뒤 호출자에게 전달합니다.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 영속 스키마 버전 불일치 (시작 시 치명적)
    #[error("incompatible schema version: found {found}, expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },

    /// 저장 값 직렬화/역직렬화 실패
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// 외부 로그 프로세스 에러
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// 빈 명령 문자열
    #[error("empty command")]
    EmptyCommand,

    /// 프로세스 실행 실패
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// stdout 파이프 획득/종료 실패
    #[error("pipe error: {0}")]
    Pipe(String),

    /// kill 시그널 전송 실패
    #[error("kill failed: {0}")]
    Kill(String),

    /// 프로세스 종료 대기 실패
    #[error("wait failed: {0}")]
    Wait(String),
}
