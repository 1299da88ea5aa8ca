//! MySQL 데이터베이스 연결 관리
//!
//! 복제 스트림과 별개로, 시작 위치와 서버 상태 조회에 쓰는 메타데이터 연결입니다.

use crate::error::{CdcError, Result};
use crate::gtid::GtidSet;
use crate::offset::BinlogPosition;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Row};
use std::time::Duration;
use tracing::debug;

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// 복제 클라이언트 ID (복제 토폴로지 안에서 유일해야 함)
    pub server_id: u32,
    /// 전송 계층 keepalive (서버 하트비트 요청)
    pub keep_alive: bool,
    /// 초기 연결 시간 예산. 초과 시 치명적 에러
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1,
            keep_alive: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn build_opts(&self) -> Result<Opts> {
        let connection_string = match &self.database {
            Some(db) => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.hostname, self.port, db
            ),
            None => format!(
                "mysql://{}:{}@{}:{}",
                self.username, self.password, self.hostname, self.port
            ),
        };
        connection_string
            .parse()
            .map_err(|_| CdcError::ConnectionError("Failed to parse connection string".to_string()))
    }
}

/// Binlog 상태 (SHOW BINARY LOG STATUS / SHOW MASTER STATUS)
#[derive(Debug, Clone)]
pub struct BinlogStatus {
    pub position: BinlogPosition,
    pub executed_gtid_set: GtidSet,
}

/// 메타데이터 조회용 MySQL 연결
pub struct MySqlConnection {
    conn: Conn,
}

impl MySqlConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = config.build_opts()?;
        let conn = tokio::time::timeout(config.connect_timeout, Conn::new(opts))
            .await
            .map_err(|_| CdcError::ConnectTimeout {
                host: config.hostname.clone(),
                port: config.port,
                user: config.username.clone(),
            })?
            .map_err(|e| CdcError::ConnectionError(format!("Failed to connect to MySQL: {}", e)))?;
        Ok(MySqlConnection { conn })
    }

    /// 현재 binlog 파일/위치와 실행된 GTID 집합 조회
    ///
    /// MySQL 8.2+의 SHOW BINARY LOG STATUS를 먼저 시도하고, 실패하면
    /// 이전 명령어인 SHOW MASTER STATUS로 폴백합니다.
    pub async fn get_binlog_status(&mut self) -> Result<BinlogStatus> {
        let rows: Vec<Row> = match self.conn.query("SHOW BINARY LOG STATUS").await {
            Ok(rows) => rows,
            Err(_) => self
                .conn
                .query("SHOW MASTER STATUS")
                .await
                .map_err(|e| CdcError::QueryError(format!("Failed to query binlog status: {}", e)))?,
        };

        let row = rows.into_iter().next().ok_or_else(|| {
            CdcError::QueryError(
                "Binlog status returned no rows (binary logging disabled?)".to_string(),
            )
        })?;

        let file: String = row.get(0).unwrap_or_default();
        let position: u64 = row.get(1).unwrap_or(BinlogPosition::FILE_HEADER_SIZE);
        if file.is_empty() {
            return Err(CdcError::QueryError(
                "Binlog status returned empty filename".to_string(),
            ));
        }

        let executed = row.get::<Option<String>, _>(4).flatten();
        let executed_gtid_set = match executed {
            Some(text) => GtidSet::parse(&text).unwrap_or_default(),
            None => GtidSet::new(),
        };

        debug!("Current binlog position: {}:{}", file, position);
        Ok(BinlogStatus {
            position: BinlogPosition::new(file, position),
            executed_gtid_set,
        })
    }

    /// GTID 모드 활성 여부
    pub async fn is_gtid_mode_enabled(&mut self) -> Result<bool> {
        Ok(self
            .get_variable("GTID_MODE")
            .await?
            .is_some_and(|v| v.eq_ignore_ascii_case("ON")))
    }

    /// 실행된 GTID 집합 조회
    pub async fn get_executed_gtid_set(&mut self) -> Result<GtidSet> {
        let result: Vec<(String,)> = self
            .conn
            .query("SELECT @@global.gtid_executed")
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query gtid_executed: {}", e)))?;
        match result.into_iter().next() {
            Some((text,)) => GtidSet::parse(&text),
            None => Ok(GtidSet::new()),
        }
    }

    /// Binlog 형식 확인 (ROW여야 행 이벤트를 받을 수 있음)
    pub async fn get_binlog_format(&mut self) -> Result<String> {
        self.get_variable("binlog_format")
            .await?
            .ok_or_else(|| CdcError::QueryError("binlog_format not found".to_string()))
    }

    pub async fn get_server_id(&mut self) -> Result<u32> {
        let result: Vec<(u32,)> = self
            .conn
            .query("SELECT @@server_id")
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query server_id: {}", e)))?;
        result
            .into_iter()
            .next()
            .map(|(id,)| id)
            .ok_or_else(|| CdcError::QueryError("server_id not found".to_string()))
    }

    async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let query = format!("SHOW GLOBAL VARIABLES LIKE '{}'", name);
        let result: Vec<(String, String)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| CdcError::QueryError(format!("Failed to query {}: {}", name, e)))?;
        Ok(result.into_iter().next().map(|(_, value)| value))
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to disconnect: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 3306);
        assert!(config.keep_alive);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builders() {
        let config = ConnectionConfig::new("127.0.0.1", "repl")
            .with_password("secret")
            .with_port(3307)
            .with_database("shop")
            .with_server_id(5432)
            .with_keep_alive(false)
            .with_connect_timeout(Duration::from_secs(5));

        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.username, "repl");
        assert_eq!(config.password, "secret");
        assert_eq!(config.port, 3307);
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.server_id, 5432);
        assert!(!config.keep_alive);
    }

    #[test]
    fn test_build_opts() {
        let config = ConnectionConfig::new("localhost", "root").with_database("testdb");
        assert!(config.build_opts().is_ok());
    }
}
