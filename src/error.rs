//! CDC 관련 에러 타입
//!
//! 스트림 무결성을 깨뜨리는 에러(연결, 역직렬화)는 리더를 중단시키고,
//! 의미상 사소한 문제(알 수 없는 테이블, 잘못된 DDL)는 로그만 남기고 계속 진행합니다.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// 초기 연결 시간 초과 (치명적)
    #[error("MySQL 연결 시간 초과: {host}:{port} (user '{user}')")]
    ConnectTimeout { host: String, port: u16, user: String },

    /// 인증 거부 (치명적)
    #[error("MySQL 인증 실패: {host}:{port} (user '{user}')")]
    AuthenticationFailed { host: String, port: u16, user: String },

    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    /// 스트리밍 중 전송 계층 실패
    #[error("전송 에러: {0}")]
    TransportError(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("DDL 파싱 에러: {0}")]
    SchemaParseError(String),

    #[error("스키마 히스토리 에러: {0}")]
    HistoryError(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    /// stop() 요청으로 인한 중단 (에러로 표면화하지 않음)
    #[error("처리 중단됨")]
    Interrupted,

    #[error("I/O 에러: {0}")]
    IoError(#[from] io::Error),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CdcError>;
