//! MySQL CDC 엔진 - 구성 요소 배선과 생명주기
//!
//! 시작 순서:
//! 1. 스키마 히스토리 복원
//! 2. 시작 위치 결정 (설정된 오프셋, 없으면 서버의 현재 binlog 상태)
//! 3. 복제 클라이언트 접속 (시간 예산 내)
//! 4. 리더 태스크 기동
//!
//! 이후 poll()로 변경 레코드를 꺼내고, stop()으로 정리합니다.

use crate::binlog_client::BinlogClient;
use crate::binlog_reader::{BinlogReader, ReaderState};
use crate::connection::{ConnectionConfig, MySqlConnection};
use crate::error::{CdcError, Result};
use crate::gtid::GtidSet;
use crate::history::{FileSchemaHistory, MemorySchemaHistory, SchemaHistory};
use crate::offset::{BinlogPosition, SourceInfo};
use crate::queue::ChangeEventQueue;
use crate::record::ChangeRecord;
use crate::schema::SchemaTracker;
use crate::table_map::TableFilter;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// CDC 엔진 설정
#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub connection: ConnectionConfig,
    /// 캡처할 데이터베이스들 (비어 있으면 전체)
    pub databases: Vec<String>,
    /// 캡처할 테이블들 (None이면 전체)
    pub tables: Option<Vec<String>>,
    /// DDL을 스키마 변경 레코드로 내보낼지 여부
    pub include_schema_changes: bool,
    /// 다운스트림 큐 용량
    pub max_queue_size: usize,
    /// 재시작 시 사용할 저장된 위치 (없으면 서버의 현재 위치)
    pub start_position: Option<BinlogPosition>,
    /// 재시작 시 사용할 저장된 GTID 집합 문자열
    pub gtid_set: Option<String>,
    /// 스키마 히스토리 파일 경로 (없으면 메모리)
    pub history_path: Option<PathBuf>,
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            connection: ConnectionConfig::default(),
            databases: Vec::new(),
            tables: None,
            include_schema_changes: false,
            max_queue_size: 8192,
            start_position: None,
            gtid_set: None,
            history_path: None,
        }
    }
}

impl CdcConfig {
    fn filter(&self) -> TableFilter {
        TableFilter {
            databases: self.databases.clone(),
            tables: self.tables.clone(),
        }
    }
}

/// 폴링 기본값
const DEFAULT_POLL_BATCH: usize = 2048;
const DEFAULT_POLL_WAIT: Duration = Duration::from_millis(500);

/// MySQL CDC 엔진
pub struct CdcEngine {
    config: CdcConfig,
    queue: Option<Arc<ChangeEventQueue>>,
    client: Option<BinlogClient>,
    reader_state: Option<Arc<RwLock<ReaderState>>>,
    stop_flag: Option<Arc<AtomicBool>>,
    reader_task: Option<JoinHandle<Result<()>>>,
}

impl CdcEngine {
    pub fn new(config: CdcConfig) -> Self {
        CdcEngine {
            config,
            queue: None,
            client: None,
            reader_state: None,
            stop_flag: None,
            reader_task: None,
        }
    }

    /// 엔진 시작
    ///
    /// 연결 시간 초과와 인증 실패는 여기서 에러로 표면화됩니다 (Failed 상태
    /// 전이 없음). 스트리밍 중의 실패는 리더 상태로 관찰합니다.
    pub async fn start(&mut self) -> Result<()> {
        if self.reader_task.is_some() {
            return Ok(());
        }

        info!(
            "Starting CDC engine against {}:{} (server_id={})",
            self.config.connection.hostname,
            self.config.connection.port,
            self.config.connection.server_id
        );

        let history: Box<dyn SchemaHistory> = match &self.config.history_path {
            Some(path) => Box::new(FileSchemaHistory::new(path)),
            None => Box::new(MemorySchemaHistory::new()),
        };

        let (start, gtid_set) = self.resolve_start_position().await?;
        info!("Starting binlog replication from {}", start);

        let source = SourceInfo::with_gtid_set(
            self.config.connection.server_id,
            start.clone(),
            gtid_set,
        );

        let (tx, queue) = crate::queue::change_event_queue(self.config.max_queue_size);
        let mut reader = BinlogReader::new(
            self.config.filter(),
            self.config.include_schema_changes,
            source,
            SchemaTracker::new(),
            history,
            tx,
        );

        let recovered = reader.recover_schema()?;
        if recovered > 0 {
            info!("Recovered schema from {} history entries", recovered);
        }

        reader.mark_connecting();
        let mut client = BinlogClient::new(self.config.connection.clone(), start);
        let events = client.connect().await?;

        self.reader_state = Some(reader.shared_state());
        self.stop_flag = Some(reader.stop_handle());
        self.queue = Some(Arc::new(queue));
        self.client = Some(client);
        self.reader_task = Some(tokio::spawn(async move { reader.run(events).await }));

        info!("CDC engine started");
        Ok(())
    }

    /// 시작 위치 결정: 저장된 오프셋 우선, 없으면 서버의 현재 상태
    async fn resolve_start_position(&self) -> Result<(BinlogPosition, GtidSet)> {
        if let Some(position) = &self.config.start_position {
            let gtid_set = match &self.config.gtid_set {
                Some(text) => GtidSet::parse(text)?,
                None => GtidSet::new(),
            };
            return Ok((position.clone(), gtid_set));
        }

        let mut conn = MySqlConnection::connect(&self.config.connection).await?;

        let server_id = conn.get_server_id().await?;
        info!("Connected to MySQL server (server_id={})", server_id);

        let gtid_enabled = conn.is_gtid_mode_enabled().await?;
        info!("GTID mode enabled: {}", gtid_enabled);

        let format = conn.get_binlog_format().await?;
        if !format.eq_ignore_ascii_case("ROW") {
            warn!(
                "binlog_format is {} (row events require ROW format)",
                format
            );
        }

        let status = conn.get_binlog_status().await?;
        conn.close().await.ok();
        Ok((status.position, status.executed_gtid_set))
    }

    /// 쌓인 변경 레코드 꺼내기 (enqueue 순서 유지)
    pub async fn poll(&self) -> Vec<ChangeRecord> {
        self.poll_batch(DEFAULT_POLL_BATCH, DEFAULT_POLL_WAIT).await
    }

    /// 최대 `max`개까지, 첫 레코드는 `wait`까지 기다리며 꺼내기
    pub async fn poll_batch(&self, max: usize, wait: Duration) -> Vec<ChangeRecord> {
        match &self.queue {
            Some(queue) => queue.drain_batch(max, wait).await,
            None => Vec::new(),
        }
    }

    /// 리더 상태 조회
    pub fn state(&self) -> ReaderState {
        self.reader_state
            .as_ref()
            .map(|cell| *cell.read())
            .unwrap_or(ReaderState::Idle)
    }

    /// 엔진 종료
    ///
    /// 전송 계층을 끊고 (멱등), 리더가 중단을 관측하게 한 뒤 태스크를
    /// 기다립니다. 이미 큐에 들어간 레코드는 종료 후에도 drain 가능합니다.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping CDC engine");

        if let Some(flag) = &self.stop_flag {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(client) = &self.client {
            client.stop().await;
        }
        if let Some(queue) = &self.queue {
            queue.close().await;
        }

        if let Some(task) = self.reader_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Binlog reader ended with error: {}", e),
                Err(e) => {
                    return Err(CdcError::Other(format!("Reader task failed: {}", e)));
                }
            }
        }
        self.client = None;

        info!("CDC engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CdcConfig::default();
        assert_eq!(config.max_queue_size, 8192);
        assert!(!config.include_schema_changes);
        assert!(config.start_position.is_none());
    }

    #[test]
    fn test_config_filter() {
        let config = CdcConfig {
            databases: vec!["shop".to_string()],
            tables: Some(vec!["orders".to_string()]),
            ..Default::default()
        };
        let filter = config.filter();
        assert!(filter.matches(&crate::schema::TableId::new("shop", "orders")));
        assert!(!filter.matches(&crate::schema::TableId::new("shop", "users")));
        assert!(!filter.matches(&crate::schema::TableId::new("other", "orders")));
    }

    #[tokio::test]
    async fn test_poll_before_start_is_empty() {
        let engine = CdcEngine::new(CdcConfig::default());
        assert!(engine.poll_batch(10, Duration::from_millis(10)).await.is_empty());
        assert_eq!(engine.state(), ReaderState::Idle);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let mut engine = CdcEngine::new(CdcConfig::default());
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), ReaderState::Idle);
    }
}
