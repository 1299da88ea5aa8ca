//! MySQL Binlog 스트리밍 클라이언트
//!
//! 복제 프로토콜로 서버에 접속해 COM_BINLOG_DUMP를 보내고, 백그라운드 태스크가
//! 패킷을 이벤트로 해석해 채널로 전달합니다. 채널의 Err 메시지는 전송/역직렬화
//! 실패를 뜻하며, 수신자는 이를 종결 상태로 취급합니다.

use crate::auth;
use crate::binlog::BinlogParser;
use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::BinlogEvent;
use crate::offset::BinlogPosition;
use crate::protocol::{self, GreetingPacket, PacketChannel};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// COM_QUERY 명령어 코드
const COM_QUERY: u8 = 0x03;
/// COM_BINLOG_DUMP 명령어 코드
const COM_BINLOG_DUMP: u8 = 0x12;
/// 디코딩된 이벤트 채널 용량
const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// keep_alive 시 서버 하트비트 주기 (나노초 단위, 15초)
const HEARTBEAT_PERIOD_NS: u64 = 15_000_000_000;

/// Binlog 복제 클라이언트
pub struct BinlogClient {
    config: ConnectionConfig,
    start: BinlogPosition,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl BinlogClient {
    pub fn new(config: ConnectionConfig, start: BinlogPosition) -> Self {
        BinlogClient {
            config,
            start,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// 접속하고 이벤트 스트림 시작
    ///
    /// 연결/인증/덤프 요청 전체가 connect_timeout 예산 안에 끝나야 합니다.
    /// 시간 초과와 인증 실패는 호출자에게 치명적 에러로 표면화됩니다.
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<Result<BinlogEvent>>> {
        let channel = tokio::time::timeout(self.config.connect_timeout, self.handshake())
            .await
            .map_err(|_| CdcError::ConnectTimeout {
                host: self.config.hostname.clone(),
                port: self.config.port,
                user: self.config.username.clone(),
            })??;

        info!(
            "Connected to MySQL binlog at {}:{}, starting at {}",
            self.config.hostname, self.config.port, self.start
        );

        self.running.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            read_loop(channel, tx, running, shutdown).await;
        });
        Ok(rx)
    }

    /// 연결 종료 요청 (멱등)
    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Stopping binlog client");
            self.shutdown.notify_waiters();
        }
    }

    async fn handshake(&self) -> Result<PacketChannel> {
        let mut channel = PacketChannel::connect(&self.config.hostname, self.config.port).await?;

        let greeting = GreetingPacket::parse(&channel.read_packet().await?)?;
        info!(
            "MySQL server version: {}, thread id: {}",
            greeting.server_version, greeting.thread_id
        );

        let response = auth::create_handshake_response(
            &self.config.username,
            &self.config.password,
            self.config.database.as_deref(),
            &greeting.scramble,
            greeting.server_collation,
        )
        .map_err(|e| CdcError::ConnectionError(format!("Failed to build auth response: {}", e)))?;
        channel.write_packet(&response, 1).await?;

        let auth_result = channel.read_packet().await?;
        if protocol::is_error_packet(&auth_result) {
            let (code, message) = protocol::parse_error_packet(&auth_result);
            debug!("Authentication rejected (code={}): {}", code, message);
            return Err(CdcError::AuthenticationFailed {
                host: self.config.hostname.clone(),
                port: self.config.port,
                user: self.config.username.clone(),
            });
        }
        debug!("Authentication successful");

        // 체크섬 비활성화: 이벤트 뒤에 CRC32가 붙지 않게 함
        if !self
            .query(&mut channel, "SET @master_binlog_checksum='NONE'")
            .await?
        {
            warn!("Failed to set binlog checksum to NONE, continuing anyway");
        }

        if self.config.keep_alive {
            let query = format!("SET @master_heartbeat_period={}", HEARTBEAT_PERIOD_NS);
            if !self.query(&mut channel, &query).await? {
                warn!("Failed to set heartbeat period, continuing without keepalive");
            }
        }

        let dump = create_binlog_dump_command(
            self.config.server_id,
            &self.start.filename,
            self.start.position,
        )?;
        channel.write_packet(&dump, 0).await?;
        debug!(
            "Sent COM_BINLOG_DUMP: file={}, position={}",
            self.start.filename, self.start.position
        );

        Ok(channel)
    }

    /// COM_QUERY 실행. OK면 true
    async fn query(&self, channel: &mut PacketChannel, sql: &str) -> Result<bool> {
        let mut packet = vec![COM_QUERY];
        packet.extend_from_slice(sql.as_bytes());
        channel.write_packet(&packet, 0).await?;
        let result = channel.read_packet().await?;
        Ok(!protocol::is_error_packet(&result))
    }
}

/// 패킷 -> 이벤트 변환 루프
///
/// 종료 조건: shutdown 통지, EOF 패킷, 서버 ERR 패킷, 소켓/파싱 에러.
/// 에러는 채널로 전달한 뒤 루프를 끝냅니다 (재연결은 상위 계층의 몫).
async fn read_loop(
    mut channel: PacketChannel,
    tx: mpsc::Sender<Result<BinlogEvent>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut parser = BinlogParser::new();
    loop {
        let packet = tokio::select! {
            _ = shutdown.notified() => {
                debug!("Binlog read loop received shutdown");
                break;
            }
            packet = channel.read_packet() => packet,
        };

        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!("Binlog socket failed: {}", e);
                    let _ = tx.send(Err(e)).await;
                }
                break;
            }
        };

        if protocol::is_error_packet(&packet) {
            let (code, message) = protocol::parse_error_packet(&packet);
            let _ = tx
                .send(Err(CdcError::TransportError(format!(
                    "Server error {}: {}",
                    code, message
                ))))
                .await;
            break;
        }

        if protocol::is_eof_packet(&packet) {
            info!("Binlog stream ended (EOF)");
            break;
        }

        // 첫 바이트 0x00은 OK 마커, 이벤트는 그 다음부터
        let event_data = if packet.first() == Some(&0x00) {
            &packet[1..]
        } else {
            &packet[..]
        };
        if event_data.is_empty() {
            continue;
        }

        match parser.parse_event(event_data) {
            Ok(event) => {
                if tx.send(Ok(event)).await.is_err() {
                    debug!("Event channel closed, stopping read loop");
                    break;
                }
            }
            Err(e) => {
                error!("Failed to deserialize binlog event: {}", e);
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
    debug!("Binlog read loop ended");
}

/// COM_BINLOG_DUMP 명령어 생성
fn create_binlog_dump_command(
    server_id: u32,
    binlog_filename: &str,
    binlog_position: u64,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.write_u8(COM_BINLOG_DUMP)?;
    // binlog position (4 bytes)
    buffer.write_u32::<LittleEndian>(binlog_position as u32)?;
    // flags: 0 = blocking dump
    buffer.write_u16::<LittleEndian>(0)?;
    buffer.write_u32::<LittleEndian>(server_id)?;
    buffer.write_all(binlog_filename.as_bytes())?;
    Ok(buffer)
}
