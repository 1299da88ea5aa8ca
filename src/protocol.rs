//! MySQL 클라이언트/서버 프로토콜 패킷 처리
//!
//! 패킷 프레이밍: 3바이트 길이 + 1바이트 시퀀스 + 본문.
//! 스트리밍 중의 소켓 에러는 전송 계층 실패로 분류합니다.

use crate::error::{CdcError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BytesMut};
use std::io::Read;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const PACKET_HEADER_SIZE: usize = 4;

/// MySQL 패킷 채널
pub struct PacketChannel {
    stream: TcpStream,
    buffer: BytesMut,
}

impl PacketChannel {
    /// TCP 연결 수립
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CdcError::ConnectionError(format!("Failed to connect to {}: {}", addr, e)))?;
        debug!("Connected to MySQL at {}", addr);
        Ok(PacketChannel {
            stream,
            buffer: BytesMut::with_capacity(16 * 1024),
        })
    }

    /// 버퍼에 최소 `len` 바이트가 모일 때까지 소켓에서 읽기
    async fn fill_buffer(&mut self, len: usize) -> Result<()> {
        while self.buffer.len() < len {
            let read = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| CdcError::TransportError(format!("Socket read failed: {}", e)))?;
            if read == 0 {
                return Err(CdcError::TransportError(
                    "Connection closed by server".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// 패킷 하나 읽기 (본문만 반환)
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        self.fill_buffer(PACKET_HEADER_SIZE).await?;
        let length =
            u32::from_le_bytes([self.buffer[0], self.buffer[1], self.buffer[2], 0]) as usize;
        let _sequence = self.buffer[3];
        self.buffer.advance(PACKET_HEADER_SIZE);

        self.fill_buffer(length).await?;
        let body = self.buffer.split_to(length);
        Ok(body.to_vec())
    }

    /// 패킷 쓰기
    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let mut header = Vec::with_capacity(PACKET_HEADER_SIZE);
        header
            .write_u24::<LittleEndian>(data.len() as u32)
            .map_err(|e| CdcError::TransportError(format!("Failed to encode header: {}", e)))?;
        WriteBytesExt::write_u8(&mut header, sequence)
            .map_err(|e| CdcError::TransportError(format!("Failed to encode sequence: {}", e)))?;

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| CdcError::TransportError(format!("Socket write failed: {}", e)))?;
        self.stream
            .write_all(data)
            .await
            .map_err(|e| CdcError::TransportError(format!("Socket write failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| CdcError::TransportError(format!("Socket flush failed: {}", e)))?;
        Ok(())
    }
}

/// 서버 인사(handshake) 패킷
pub struct GreetingPacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
}

impl GreetingPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let err = |what: &str| CdcError::ConnectionError(format!("Malformed greeting: {}", what));

        let protocol_version = ReadBytesExt::read_u8(&mut cursor).map_err(|_| err("protocol version"))?;
        let server_version = read_null_terminated(&mut cursor)?;
        let thread_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(|_| err("thread id"))?;

        let mut scramble_head = vec![0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut scramble_head)
            .map_err(|_| err("scramble"))?;
        ReadBytesExt::read_u8(&mut cursor).map_err(|_| err("filler"))?;

        let capabilities_low = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|_| err("capabilities"))?;
        let server_collation = ReadBytesExt::read_u8(&mut cursor).map_err(|_| err("collation"))?;
        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|_| err("status"))?;
        let capabilities_high = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|_| err("capabilities"))?;
        let server_capabilities = ((capabilities_high as u32) << 16) | capabilities_low as u32;

        let auth_data_len = ReadBytesExt::read_u8(&mut cursor).map_err(|_| err("auth data length"))?;
        let mut reserved = [0u8; 10];
        std::io::Read::read_exact(&mut cursor, &mut reserved)
            .map_err(|_| err("reserved"))?;

        // scramble 후반부: 최소 13바이트, 마지막 null 제외
        let tail_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_tail = vec![0u8; tail_len];
        std::io::Read::read_exact(&mut cursor, &mut scramble_tail)
            .map_err(|_| err("scramble tail"))?;

        let mut scramble = scramble_head;
        scramble.extend_from_slice(&scramble_tail[..scramble_tail.len() - 1]);

        Ok(GreetingPacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
        })
    }
}

fn read_null_terminated<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = reader
            .read_u8()
            .map_err(|_| CdcError::ConnectionError("Malformed greeting: string".to_string()))?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes)
        .map_err(|e| CdcError::ConnectionError(format!("Invalid UTF-8 in greeting: {}", e)))
}

/// ERR 패킷 여부
pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

/// OK 패킷 여부
pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

/// EOF 패킷 여부
pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}

/// ERR 패킷에서 (에러 코드, 메시지) 추출
pub fn parse_error_packet(data: &[u8]) -> (u16, String) {
    if data.len() < 3 {
        return (0, "malformed error packet".to_string());
    }
    let code = u16::from_le_bytes([data[1], data[2]]);
    // 프로토콜 4.1+은 '#' + 5바이트 SQL state가 붙음
    let message_start = if data.len() > 3 && data[3] == b'#' {
        9.min(data.len())
    } else {
        3
    };
    let message = String::from_utf8_lossy(&data[message_start..]).to_string();
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_classification() {
        assert!(is_error_packet(&[0xFF, 0x01, 0x02]));
        assert!(!is_error_packet(&[0x00, 0x01, 0x02]));
        assert!(is_ok_packet(&[0x00, 0x01]));
        assert!(is_eof_packet(&[0xFE, 0x00, 0x00]));
        assert!(!is_eof_packet(&[0xFE; 9]));
    }

    #[test]
    fn test_parse_error_packet_with_sql_state() {
        let mut packet = vec![0xFF];
        packet.extend_from_slice(&1045u16.to_le_bytes());
        packet.push(b'#');
        packet.extend_from_slice(b"28000");
        packet.extend_from_slice(b"Access denied");

        let (code, message) = parse_error_packet(&packet);
        assert_eq!(code, 1045);
        assert_eq!(message, "Access denied");
    }

    #[test]
    fn test_parse_error_packet_without_sql_state() {
        let mut packet = vec![0xFF];
        packet.extend_from_slice(&1236u16.to_le_bytes());
        packet.extend_from_slice(b"Could not find first log file");

        let (code, message) = parse_error_packet(&packet);
        assert_eq!(code, 1236);
        assert!(message.contains("first log file"));
    }

    #[test]
    fn test_parse_greeting() {
        let mut data = Vec::new();
        data.push(10); // protocol version
        data.extend_from_slice(b"8.0.36\0");
        data.extend_from_slice(&42u32.to_le_bytes()); // thread id
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // scramble part 1
        data.push(0); // filler
        data.extend_from_slice(&0xf7ffu16.to_le_bytes()); // capabilities low
        data.push(33); // collation
        data.extend_from_slice(&2u16.to_le_bytes()); // status
        data.extend_from_slice(&0x0000u16.to_le_bytes()); // capabilities high
        data.push(21); // auth data length
        data.extend_from_slice(&[0u8; 10]); // reserved
        data.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]); // part 2

        let greeting = GreetingPacket::parse(&data).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "8.0.36");
        assert_eq!(greeting.thread_id, 42);
        assert_eq!(greeting.scramble.len(), 20);
        assert_eq!(greeting.server_collation, 33);
    }
}
