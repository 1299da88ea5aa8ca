/// MySQL CDC 엔진 사용 예제
///
/// 환경 변수로 접속 정보를 받아 binlog 스트리밍을 시작하고,
/// 받은 변경 레코드를 로그로 출력합니다. Ctrl-C로 종료합니다.
use mysql_cdc::cdc_engine::{CdcConfig, CdcEngine};
use mysql_cdc::connection::ConnectionConfig;
use std::env;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let connection = ConnectionConfig {
        hostname: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("DB_PORT")
            .unwrap_or_else(|_| "3306".to_string())
            .parse()
            .unwrap_or(3306),
        username: env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("DB_PASSWORD").unwrap_or_default(),
        database: env::var("DB_NAME").ok(),
        server_id: env::var("SERVER_ID")
            .unwrap_or_else(|_| "1001".to_string())
            .parse()
            .unwrap_or(1001),
        ..Default::default()
    };

    let config = CdcConfig {
        connection,
        databases: env::var("DB_NAME").map(|db| vec![db]).unwrap_or_default(),
        include_schema_changes: true,
        history_path: Some("schema-history.jsonl".into()),
        ..Default::default()
    };

    info!(
        "Connecting to {}:{}",
        config.connection.hostname, config.connection.port
    );

    let mut engine = CdcEngine::new(config);
    engine.start().await?;

    info!("Listening for change events... (Ctrl-C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            records = engine.poll_batch(256, Duration::from_millis(500)) => {
                for record in records {
                    info!(
                        "[{}] {}.{} source={}",
                        record.op.as_str(),
                        record.database,
                        record.table,
                        record.source
                    );
                }
            }
        }
    }

    engine.stop().await?;
    info!("Done");
    Ok(())
}
