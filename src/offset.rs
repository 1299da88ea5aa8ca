//! Binlog 처리 위치 추적 (position cursor)
//!
//! 파일명 + 바이트 위치 + 이벤트 내 행 번호로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치, 3번째 행부터

use crate::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Binlog 파일 위치
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    /// MySQL binlog 파일은 4바이트 매직 넘버 뒤에서 시작
    pub const FILE_HEADER_SIZE: u64 = 4;

    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 파일 시작 위치 (매직 넘버 직후)
    pub fn start_of(filename: impl Into<String>) -> Self {
        BinlogPosition::new(filename, Self::FILE_HEADER_SIZE)
    }

    /// 파일명 끝의 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename.rsplit('.').next().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 현재 처리 위치 커서
///
/// 리더(수신 컨텍스트)만 갱신하며, 폴러는 레코드에 첨부된 스냅샷으로 위치를 읽습니다.
/// 이벤트 하나를 끝까지 처리한 뒤의 `to_offset()`은 항상 "다음에 읽어야 할 지점"을
/// 가리킵니다. 여러 행을 담은 이벤트 재개 시 `row` 만큼 건너뛰면 중복이 없습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// 이벤트를 생성한 MySQL 서버 ID
    server_id: u32,
    /// 현재 binlog 파일명
    binlog_filename: String,
    /// 현재 binlog 위치
    binlog_position: u64,
    /// 여러 행 이벤트 안에서의 행 번호 (0부터)
    row_in_event: u32,
    /// 마지막 이벤트 타임스탬프 (초)
    ts_sec: u32,
    /// 처리된 GTID 집합
    gtid_set: GtidSet,
}

impl SourceInfo {
    pub fn new(server_id: u32, position: BinlogPosition) -> Self {
        SourceInfo {
            server_id,
            binlog_filename: position.filename,
            binlog_position: position.position,
            row_in_event: 0,
            ts_sec: 0,
            gtid_set: GtidSet::new(),
        }
    }

    /// 저장된 GTID 집합과 함께 생성 (재시작 시)
    pub fn with_gtid_set(server_id: u32, position: BinlogPosition, gtid_set: GtidSet) -> Self {
        let mut info = SourceInfo::new(server_id, position);
        info.gtid_set = gtid_set;
        info
    }

    /// 이벤트 헤더 관측: 타임스탬프와 서버 ID 갱신
    pub fn update_header(&mut self, ts_sec: u32, server_id: u32) {
        self.ts_sec = ts_sec;
        self.server_id = server_id;
    }

    /// ROTATE 관측: 파일/위치를 교체하고 행 번호 리셋
    pub fn update_rotate(&mut self, filename: impl Into<String>, position: u64) {
        self.binlog_filename = filename.into();
        self.binlog_position = position;
        self.row_in_event = 0;
    }

    /// 헤더의 next_pos 관측: 0보다 클 때만 위치를 전진하고 행 번호 리셋
    pub fn update_next_position(&mut self, next_pos: u64) {
        if next_pos > 0 {
            self.binlog_position = next_pos;
            self.row_in_event = 0;
        }
    }

    /// GTID 이벤트 관측: 집합에 추가
    ///
    /// 잘못된 형식은 경고만 남기고 무시합니다 (스트림은 계속 전진).
    pub fn record_gtid(&mut self, gtid: &str) {
        if let Err(e) = self.gtid_set.add_gtid(gtid) {
            tracing::warn!("Ignoring malformed GTID '{}': {}", gtid, e);
        }
    }

    /// 행 하나를 내보낸 뒤 호출
    pub fn advance_row(&mut self) {
        self.row_in_event += 1;
    }

    /// 행 번호 고정 (update 경로에서 행 인덱스를 직접 지정)
    pub fn set_row_in_event(&mut self, row: u32) {
        self.row_in_event = row;
    }

    pub fn binlog_filename(&self) -> &str {
        &self.binlog_filename
    }

    pub fn binlog_position(&self) -> u64 {
        self.binlog_position
    }

    pub fn row_in_event(&self) -> u32 {
        self.row_in_event
    }

    pub fn ts_sec(&self) -> u32 {
        self.ts_sec
    }

    pub fn gtid_set(&self) -> &GtidSet {
        &self.gtid_set
    }

    pub fn position(&self) -> BinlogPosition {
        BinlogPosition::new(self.binlog_filename.clone(), self.binlog_position)
    }

    /// 영속 가능한 오프셋 맵
    ///
    /// 키는 싱크가 체크포인트에 기록하는 안정 키: server_id, file, pos, row, ts_sec,
    /// gtids(집합이 비어있지 않을 때만).
    pub fn to_offset(&self) -> serde_json::Value {
        let mut offset = json!({
            "server_id": self.server_id,
            "file": self.binlog_filename,
            "pos": self.binlog_position,
            "row": self.row_in_event,
            "ts_sec": self.ts_sec,
        });
        if !self.gtid_set.is_empty() {
            offset["gtids"] = json!(self.gtid_set.to_string());
        }
        offset
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (server_id={}, row={})",
            self.binlog_filename, self.binlog_position, self.server_id, self.row_in_event
        )
    }
}
