//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MySQL Binlog 이벤트 타입
///
/// 숫자 값은 MySQL 복제 프로토콜의 이벤트 타입 코드와 동일합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (DDL, BEGIN/COMMIT)
    QueryEvent = 2,
    /// mysqld 종료 이벤트
    StopEvent = 3,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// Binlog 포맷 기술 이벤트
    FormatDescriptionEvent = 15,
    /// 트랜잭션 커밋 이벤트
    XidEvent = 16,
    /// 테이블 맵 이벤트 (테이블 번호 <-> 테이블 식별)
    TableMapEvent = 19,
    /// 마스터 측 이상 상황 통지
    IncidentEvent = 26,
    /// 마스터 생존 신호 (binlog에는 기록되지 않음)
    HeartbeatEvent = 27,
    /// WRITE_ROWS v2 이벤트 (INSERT)
    WriteRowsEvent = 30,
    /// UPDATE_ROWS v2 이벤트 (UPDATE)
    UpdateRowsEvent = 31,
    /// DELETE_ROWS v2 이벤트 (DELETE)
    DeleteRowsEvent = 32,
    /// GTID 이벤트 (Global Transaction ID)
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// 이전 GTID 집합 이벤트
    PreviousGtidsEvent = 35,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            26 => EventType::IncidentEvent,
            27 => EventType::HeartbeatEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            _ => EventType::Unknown,
        }
    }
}

/// Binlog 이벤트 헤더 (v4, 19바이트)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// 이벤트를 생성한 MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (바이트)
    pub event_length: u32,
    /// 다음 이벤트의 binlog 내 위치 (0이면 위치 추적 불가 이벤트)
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

/// 테이블 맵 정보 (테이블 번호와 컬럼 메타데이터)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapData {
    /// 서버가 부여한 일시적 테이블 번호
    pub table_id: u64,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
    /// 컬럼 타입 코드들 (MYSQL_TYPE_*)
    pub column_types: Vec<u8>,
    /// 컬럼별 타입 메타데이터
    pub column_meta: Vec<u16>,
    /// nullable 비트맵
    pub nullable_bitmap: Vec<u8>,
}

/// WRITE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRowsData {
    pub table_id: u64,
    pub flags: u16,
    /// 컬럼 개수
    pub column_count: u64,
    /// 포함된 컬럼 비트맵
    pub columns_present: Vec<u8>,
    /// 행 데이터들 (after 이미지)
    pub rows: Vec<Vec<CellValue>>,
}

/// UPDATE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRowsData {
    pub table_id: u64,
    pub flags: u16,
    pub column_count: u64,
    /// before 이미지에 포함된 컬럼 비트맵
    pub columns_present: Vec<u8>,
    /// after 이미지에 포함된 컬럼 비트맵
    pub columns_changed: Vec<u8>,
    /// (before, after) 행 쌍들
    pub rows: Vec<(Vec<CellValue>, Vec<CellValue>)>,
}

/// DELETE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRowsData {
    pub table_id: u64,
    pub flags: u16,
    pub column_count: u64,
    pub columns_present: Vec<u8>,
    /// 행 데이터들 (before 이미지)
    pub rows: Vec<Vec<CellValue>>,
}

/// 셀 값 (지원하는 MySQL 타입들)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(String),
    Time(String),
    Year(u16),
    Decimal(String),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::Null => Some("NULL".to_string()),
            CellValue::Int8(v) => Some(v.to_string()),
            CellValue::Int16(v) => Some(v.to_string()),
            CellValue::Int32(v) => Some(v.to_string()),
            CellValue::Int64(v) => Some(v.to_string()),
            CellValue::Float(v) => Some(v.to_string()),
            CellValue::Double(v) => Some(v.to_string()),
            CellValue::String(s) => Some(s.clone()),
            CellValue::DateTime(dt) => Some(dt.to_rfc3339()),
            CellValue::Date(s) | CellValue::Time(s) | CellValue::Decimal(s) => Some(s.clone()),
            CellValue::Year(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtidEventData {
    /// GTID 문자열 (format: uuid:sequence)
    pub gtid: String,
    /// 커밋 플래그
    pub committed: bool,
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 실행 스레드 ID
    pub thread_id: u32,
    /// 실행 시간 (초)
    pub exec_time: u32,
    /// 기본 데이터베이스명
    pub database: String,
    /// SQL 문자열
    pub query: String,
}

/// 로테이션 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일에서의 시작 위치
    pub position: u64,
}

/// INCIDENT 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentData {
    /// 이상 상황 코드 (1 = LOST_EVENTS)
    pub code: u16,
    /// 서버가 남긴 메시지
    pub message: String,
}

/// 이벤트 종류별 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BinlogEventData {
    Stop,
    Heartbeat,
    Incident(IncidentData),
    Rotate(RotateEventData),
    TableMap(TableMapData),
    Query(QueryEventData),
    Gtid(GtidEventData),
    WriteRows(WriteRowsData),
    UpdateRows(UpdateRowsData),
    DeleteRows(DeleteRowsData),
    Xid(u64),
    FormatDescription,
    /// 핸들러가 없는 이벤트들의 원본 페이로드
    Unknown(Vec<u8>),
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    pub header: EventHeader,
    pub data: BinlogEventData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_from_u8() {
        assert_eq!(EventType::from_u8(4), EventType::RotateEvent);
        assert_eq!(EventType::from_u8(19), EventType::TableMapEvent);
        assert_eq!(EventType::from_u8(30), EventType::WriteRowsEvent);
        assert_eq!(EventType::from_u8(27), EventType::HeartbeatEvent);
        assert_eq!(EventType::from_u8(200), EventType::Unknown);
    }

    #[test]
    fn test_cell_value_as_string() {
        assert_eq!(CellValue::Int32(42).as_string(), Some("42".to_string()));
        assert_eq!(CellValue::Null.as_string(), Some("NULL".to_string()));
        assert_eq!(
            CellValue::String("abc".to_string()).as_string(),
            Some("abc".to_string())
        );
        assert!(CellValue::Bytes(vec![1, 2]).as_string().is_none());
    }
}
