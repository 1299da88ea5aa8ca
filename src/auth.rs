//! MySQL 인증 처리
//!
//! mysql_native_password 방식의 scramble 응답과 핸드셰이크 응답 패킷을 만듭니다.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// Client capability flags
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const FOUND_ROWS: u32 = 2;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

/// native password 스크램블 응답
///
/// XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))
pub fn create_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// HandshakeResponse41 패킷 생성
pub fn create_handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
) -> Result<Vec<u8>, std::io::Error> {
    let mut buffer = Vec::new();

    let mut caps = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::TRANSACTIONS
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;
    if database.is_some() {
        caps |= capabilities::CONNECT_WITH_DB;
    }

    buffer.write_u32::<LittleEndian>(caps)?;
    // max packet size: 0 = 서버 기본값
    buffer.write_u32::<LittleEndian>(0)?;
    buffer.write_u8(collation)?;
    buffer.write_all(&[0u8; 23])?; // reserved

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let auth_response = create_auth_response(password, scramble);
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(b"mysql_native_password")?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_empty_password() {
        assert!(create_auth_response("", &[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn test_auth_response_length() {
        let scramble = [0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        // SHA1은 20바이트
        assert_eq!(create_auth_response("password", &scramble).len(), 20);
    }

    #[test]
    fn test_auth_response_is_deterministic() {
        let scramble = [1u8; 20];
        assert_eq!(
            create_auth_response("secret", &scramble),
            create_auth_response("secret", &scramble)
        );
        assert_ne!(
            create_auth_response("secret", &scramble),
            create_auth_response("other", &scramble)
        );
    }

    #[test]
    fn test_handshake_response_shape() {
        let scramble = [7u8; 20];
        let packet =
            create_handshake_response("root", "password", Some("testdb"), &scramble, 33).unwrap();

        // capability + max packet + collation + reserved = 32바이트 고정 접두부
        assert!(packet.len() > 32);
        let caps = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_ne!(caps & capabilities::CONNECT_WITH_DB, 0);
        assert_eq!(packet[8], 33);
        // username은 고정 접두부 바로 뒤
        assert_eq!(&packet[32..36], b"root");
    }

    #[test]
    fn test_handshake_response_without_database() {
        let scramble = [7u8; 20];
        let packet = create_handshake_response("root", "", None, &scramble, 33).unwrap();
        let caps = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_eq!(caps & capabilities::CONNECT_WITH_DB, 0);
    }
}
