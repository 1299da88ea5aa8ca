//! Binlog 이벤트 디스패처
//!
//! 이벤트 소스가 전달하는 이벤트를 binlog 순서 그대로 받아:
//! 커서를 갱신하고, 이벤트 타입별 핸들러로 분배하고, 행 이벤트를 변경
//! 레코드로 바꿔 큐에 넣습니다. 커서와 테이블 번호 맵은 이 컨텍스트만
//! 접근하므로 잠금이 필요 없습니다.

use crate::error::{CdcError, Result};
use crate::events::{
    BinlogEvent, BinlogEventData, DeleteRowsData, EventType, IncidentData, QueryEventData,
    RotateEventData, TableMapData, UpdateRowsData, WriteRowsData,
};
use crate::history::{HistoryRecord, SchemaHistory};
use crate::offset::SourceInfo;
use crate::queue::RecordSender;
use crate::record::RecordMakers;
use crate::schema::{SchemaTracker, TableId};
use crate::table_map::TableFilter;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// 리더 상태 기계
///
/// Idle -> Connecting -> Streaming -> {Stopped, Failed}
/// Failed는 이 계층에서는 종결 상태입니다. 재시도는 상위 감독 계층의 몫입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
    Failed,
}

/// 이벤트 타입별 핸들러 태그
#[derive(Debug, Clone, Copy)]
enum EventHandler {
    ServerStop,
    ServerHeartbeat,
    ServerIncident,
    RotateLogs,
    UpdateTableMetadata,
    Query,
    Insert,
    Update,
    Delete,
}

/// Binlog 리더 (디스패처)
pub struct BinlogReader {
    state: Arc<RwLock<ReaderState>>,
    stop_flag: Arc<AtomicBool>,
    source: SourceInfo,
    schema: SchemaTracker,
    history: Box<dyn SchemaHistory>,
    record_makers: RecordMakers,
    handlers: HashMap<EventType, EventHandler>,
    include_schema_changes: bool,
    stopping: bool,
}

impl BinlogReader {
    pub fn new(
        filter: TableFilter,
        include_schema_changes: bool,
        source: SourceInfo,
        schema: SchemaTracker,
        history: Box<dyn SchemaHistory>,
        tx: RecordSender,
    ) -> Self {
        let mut reader = BinlogReader {
            state: Arc::new(RwLock::new(ReaderState::Idle)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            source,
            schema,
            history,
            record_makers: RecordMakers::new(filter, tx),
            handlers: HashMap::new(),
            include_schema_changes,
            stopping: false,
        };
        reader.register_handlers();
        reader
    }

    fn register_handlers(&mut self) {
        self.handlers.insert(EventType::StopEvent, EventHandler::ServerStop);
        self.handlers
            .insert(EventType::HeartbeatEvent, EventHandler::ServerHeartbeat);
        self.handlers
            .insert(EventType::IncidentEvent, EventHandler::ServerIncident);
        self.handlers.insert(EventType::RotateEvent, EventHandler::RotateLogs);
        self.handlers
            .insert(EventType::TableMapEvent, EventHandler::UpdateTableMetadata);
        self.handlers.insert(EventType::QueryEvent, EventHandler::Query);
        self.handlers.insert(EventType::WriteRowsEvent, EventHandler::Insert);
        self.handlers.insert(EventType::UpdateRowsEvent, EventHandler::Update);
        self.handlers.insert(EventType::DeleteRowsEvent, EventHandler::Delete);
    }

    pub fn state(&self) -> ReaderState {
        *self.state.read()
    }

    /// 엔진 등 외부 관측자와 공유하는 상태 셀
    pub fn shared_state(&self) -> Arc<RwLock<ReaderState>> {
        Arc::clone(&self.state)
    }

    /// stop() 요청 전달용 플래그
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    pub fn schema(&self) -> &SchemaTracker {
        &self.schema
    }

    fn set_state(&self, state: ReaderState) {
        *self.state.write() = state;
    }

    pub fn mark_connecting(&self) {
        self.set_state(ReaderState::Connecting);
    }

    pub fn mark_failed(&self) {
        self.set_state(ReaderState::Failed);
    }

    /// 저장된 스키마 히스토리 재생 (스트리밍 시작 전에 호출)
    pub fn recover_schema(&mut self) -> Result<usize> {
        let entries = self.history.recover()?;
        let count = entries.len();
        for entry in entries {
            for statement in &entry.statements {
                if let Err(e) = self.schema.apply_ddl(&entry.database, statement) {
                    // 기록 당시에는 적용됐던 문장: 재생 실패는 경고만
                    warn!("Failed to replay history statement '{}': {}", statement, e);
                }
            }
        }
        Ok(count)
    }

    /// 이벤트 채널을 소진할 때까지 디스패치
    ///
    /// 채널의 Err 메시지(전송/역직렬화 실패)는 Failed 전이로 이어지고,
    /// stop 요청에 의한 종료는 에러 없이 Stopped로 끝납니다.
    pub async fn run(&mut self, mut events: mpsc::Receiver<Result<BinlogEvent>>) -> Result<()> {
        self.set_state(ReaderState::Streaming);
        info!("Binlog reader streaming from {}", self.source);

        while let Some(message) = events.recv().await {
            match message {
                Ok(event) => {
                    self.handle_event(event).await?;
                    if self.stopping {
                        break;
                    }
                }
                Err(e) => {
                    self.set_state(ReaderState::Failed);
                    error!("Binlog stream failed: {}", e);
                    return Err(e);
                }
            }
        }

        if self.stopping || self.stop_flag.load(Ordering::SeqCst) {
            self.set_state(ReaderState::Stopped);
            info!("Stopped reading binlog and closed connection");
            Ok(())
        } else {
            self.set_state(ReaderState::Failed);
            error!("Binlog stream disconnected unexpectedly");
            Err(CdcError::TransportError(
                "binlog stream disconnected".to_string(),
            ))
        }
    }

    /// 이벤트 하나 처리
    ///
    /// 순서: 헤더로 커서 갱신 -> ROTATE면 파일/위치 교체, 아니면 next_pos 반영
    /// -> GTID면 집합에 추가 -> 핸들러 조회 후 위임. 핸들러가 중단(Interrupted)을
    /// 관측하면 핸들러 테이블을 비우고 조용히 반환합니다.
    pub async fn handle_event(&mut self, event: BinlogEvent) -> Result<()> {
        if self.stopping {
            return Ok(());
        }

        let header = event.header.clone();
        self.source.update_header(header.timestamp, header.server_id);

        if let BinlogEventData::Rotate(rotate) = &event.data {
            self.source
                .update_rotate(rotate.next_binlog_name.clone(), rotate.position);
        } else {
            self.source.update_next_position(header.next_pos as u64);
        }

        if let BinlogEventData::Gtid(gtid) = &event.data {
            self.source.record_gtid(&gtid.gtid);
        }

        let handler = match self.handlers.get(&header.event_type) {
            Some(handler) => *handler,
            None => {
                trace!("Ignoring event due to missing handler: {:?}", header.event_type);
                return Ok(());
            }
        };

        match self.dispatch(handler, &event).await {
            Ok(()) => Ok(()),
            Err(CdcError::Interrupted) => {
                self.handlers.clear();
                self.stopping = true;
                info!("Stopped processing binlog events due to interruption");
                Ok(())
            }
            Err(e) => {
                self.set_state(ReaderState::Failed);
                Err(e)
            }
        }
    }

    async fn dispatch(&mut self, handler: EventHandler, event: &BinlogEvent) -> Result<()> {
        match (handler, &event.data) {
            (EventHandler::ServerStop, _) => {
                debug!("Server stopped");
                Ok(())
            }
            (EventHandler::ServerHeartbeat, _) => {
                trace!("Server heartbeat");
                Ok(())
            }
            (EventHandler::ServerIncident, BinlogEventData::Incident(data)) => {
                self.handle_server_incident(data);
                Ok(())
            }
            (EventHandler::RotateLogs, BinlogEventData::Rotate(data)) => {
                self.handle_rotate_logs(data);
                Ok(())
            }
            (EventHandler::UpdateTableMetadata, BinlogEventData::TableMap(data)) => {
                self.handle_update_table_metadata(data);
                Ok(())
            }
            (EventHandler::Query, BinlogEventData::Query(data)) => {
                self.handle_query(data).await
            }
            (EventHandler::Insert, BinlogEventData::WriteRows(data)) => {
                self.handle_insert(data).await
            }
            (EventHandler::Update, BinlogEventData::UpdateRows(data)) => {
                self.handle_update(data).await
            }
            (EventHandler::Delete, BinlogEventData::DeleteRows(data)) => {
                self.handle_delete(data).await
            }
            (handler, _) => Err(CdcError::BinlogParseError(format!(
                "Event payload does not match handler {:?}: {:?}",
                handler, event.header.event_type
            ))),
        }
    }

    fn handle_server_incident(&self, data: &IncidentData) {
        warn!(
            "Server incident (code={}): {}",
            data.code,
            if data.message.is_empty() {
                "<no message>"
            } else {
                &data.message
            }
        );
    }

    /// 로테이션: 커서는 이미 갱신됨. 테이블 번호 바인딩만 전부 무효화
    fn handle_rotate_logs(&mut self, data: &RotateEventData) {
        debug!(
            "Rotating logs to {} at position {}",
            data.next_binlog_name, data.position
        );
        self.record_makers.clear();
    }

    fn handle_update_table_metadata(&mut self, data: &TableMapData) {
        let table_id = TableId::new(data.database.clone(), data.table.clone());
        if self.record_makers.assign(data.table_id, table_id) {
            debug!(
                "Received update table metadata event: table_number={} -> {}.{}",
                data.table_id, data.database, data.table
            );
        } else {
            debug!(
                "Skipping update table metadata event: table_number={}",
                data.table_id
            );
        }
    }

    /// DDL 적용: 스냅샷 변경 -> 히스토리 영속화 -> (옵션) 스키마 변경 레코드
    ///
    /// 히스토리 기록은 이 이벤트를 완료로 간주하기 전에 끝나야 하므로, 기록
    /// 실패는 스트림 무결성 에러로 취급합니다. 해석 불가 DDL은 스냅샷을 건드리지
    /// 않고 경고만 남깁니다.
    async fn handle_query(&mut self, data: &QueryEventData) -> Result<()> {
        match self.schema.apply_ddl(&data.database, &data.query) {
            Ok(statements) => {
                if statements.is_empty() {
                    return Ok(());
                }
                let entry = HistoryRecord {
                    source: self.source.to_offset(),
                    database: data.database.clone(),
                    statements: statements.clone(),
                };
                self.history.record(&entry)?;

                if self.include_schema_changes {
                    let count = self
                        .record_makers
                        .schema_changes(&data.database, &statements, Utc::now(), &self.source)
                        .await?;
                    if count > 0 {
                        debug!(
                            "Recorded DDL statements for database '{}': {:?}",
                            data.database, statements
                        );
                    }
                }
                Ok(())
            }
            Err(CdcError::SchemaParseError(msg)) => {
                warn!("Skipping unparseable DDL: {}", msg);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_insert(&mut self, data: &WriteRowsData) -> Result<()> {
        let records = match self.record_makers.for_table(
            data.table_id,
            &data.columns_present,
            data.column_count as usize,
            self.schema.snapshot(),
        ) {
            Some(records) => records,
            None => {
                trace!(
                    "Skipping insert row event: no binding for table_number={}",
                    data.table_id
                );
                return Ok(());
            }
        };
        let count = self
            .record_makers
            .create_each(&records, &data.rows, Utc::now(), &mut self.source)
            .await?;
        debug!("Recorded {} insert record(s) for {}", count, records.table_id);
        Ok(())
    }

    async fn handle_update(&mut self, data: &UpdateRowsData) -> Result<()> {
        let records = match self.record_makers.for_table(
            data.table_id,
            &data.columns_present,
            data.column_count as usize,
            self.schema.snapshot(),
        ) {
            Some(records) => records,
            None => {
                trace!(
                    "Skipping update row event: no binding for table_number={}",
                    data.table_id
                );
                return Ok(());
            }
        };
        let ts = Utc::now();
        let mut count = 0;
        for (row, (before, after)) in data.rows.iter().enumerate() {
            count += self
                .record_makers
                .update(&records, before, after, ts, row as u32, &mut self.source)
                .await?;
        }
        debug!("Recorded {} update record(s) for {}", count, records.table_id);
        Ok(())
    }

    async fn handle_delete(&mut self, data: &DeleteRowsData) -> Result<()> {
        let records = match self.record_makers.for_table(
            data.table_id,
            &data.columns_present,
            data.column_count as usize,
            self.schema.snapshot(),
        ) {
            Some(records) => records,
            None => {
                trace!(
                    "Skipping delete row event: no binding for table_number={}",
                    data.table_id
                );
                return Ok(());
            }
        };
        let count = self
            .record_makers
            .delete_each(&records, &data.rows, Utc::now(), &mut self.source)
            .await?;
        debug!("Recorded {} delete record(s) for {}", count, records.table_id);
        Ok(())
    }
}
