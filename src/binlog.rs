//! MySQL Binlog 이벤트 파싱
//!
//! 이벤트 형식 (v4):
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Next Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Data (variable)
//!
//! 행 이벤트의 값 해석에는 TABLE_MAP의 컬럼 타입이 필요하므로 파서는
//! 마지막으로 본 테이블 맵들을 기억합니다.

use crate::error::{CdcError, Result};
use crate::events::*;
use crate::table_map::bit_set;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::TimeZone;
use std::collections::HashMap;
use std::io::{Cursor, Read};

const BINLOG_MAGIC: &[u8] = &[0xfe, 0x62, 0x69, 0x6e]; // ".bin" in ASCII
const EVENT_HEADER_SIZE: usize = 19;

// MYSQL_TYPE_* 코드 중 지원하는 것들
const TYPE_TINY: u8 = 1;
const TYPE_SHORT: u8 = 2;
const TYPE_LONG: u8 = 3;
const TYPE_FLOAT: u8 = 4;
const TYPE_DOUBLE: u8 = 5;
const TYPE_NULL: u8 = 6;
const TYPE_LONGLONG: u8 = 8;
const TYPE_INT24: u8 = 9;
const TYPE_DATE: u8 = 10;
const TYPE_YEAR: u8 = 13;
const TYPE_VARCHAR: u8 = 15;
const TYPE_BIT: u8 = 16;
const TYPE_TIMESTAMP2: u8 = 17;
const TYPE_DATETIME2: u8 = 18;
const TYPE_TIME2: u8 = 19;
const TYPE_NEWDECIMAL: u8 = 246;
const TYPE_BLOB: u8 = 252;
const TYPE_VAR_STRING: u8 = 253;
const TYPE_STRING: u8 = 254;

/// Binlog 이벤트 파서
///
/// 행 이벤트 해석을 위해 TABLE_MAP을 테이블 번호별로 기억합니다.
/// ROTATE를 만나면 기억을 비웁니다 (번호가 새 파일에서 재사용됨).
#[derive(Default)]
pub struct BinlogParser {
    table_maps: HashMap<u64, TableMapData>,
}

impl BinlogParser {
    pub fn new() -> Self {
        BinlogParser::default()
    }

    /// Binlog 파일 매직 넘버 검증
    pub fn verify_magic(data: &[u8]) -> Result<()> {
        if data.len() < 4 || data[0..4] != BINLOG_MAGIC[..] {
            return Err(CdcError::BinlogParseError(
                "Invalid binlog magic number".to_string(),
            ));
        }
        Ok(())
    }

    /// 이벤트 헤더 파싱. (헤더, 소비한 바이트 수) 반환
    pub fn parse_header(data: &[u8]) -> Result<(EventHeader, usize)> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(CdcError::BinlogParseError(
                "Event header too short".to_string(),
            ));
        }
        let mut cursor = Cursor::new(data);
        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_type = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        Ok((
            EventHeader {
                timestamp,
                event_type: EventType::from_u8(event_type),
                server_id,
                event_length,
                next_pos,
                flags,
            },
            EVENT_HEADER_SIZE,
        ))
    }

    /// 완전한 이벤트 하나 파싱 (헤더 + 페이로드)
    pub fn parse_event(&mut self, data: &[u8]) -> Result<BinlogEvent> {
        let (header, consumed) = Self::parse_header(data)?;
        let body = &data[consumed..];

        let parsed = match header.event_type {
            EventType::StopEvent => BinlogEventData::Stop,
            EventType::HeartbeatEvent => BinlogEventData::Heartbeat,
            EventType::FormatDescriptionEvent => BinlogEventData::FormatDescription,
            EventType::IncidentEvent => BinlogEventData::Incident(parse_incident(body)?),
            EventType::QueryEvent => BinlogEventData::Query(parse_query_event(body)?),
            EventType::XidEvent => {
                let mut cursor = Cursor::new(body);
                BinlogEventData::Xid(cursor.read_u64::<LittleEndian>()?)
            }
            EventType::GtidEvent => BinlogEventData::Gtid(parse_gtid_event(body)?),
            EventType::RotateEvent => {
                let rotate = parse_rotate_event(body)?;
                // 새 파일에서 테이블 번호가 재사용되므로 기억을 비움
                self.table_maps.clear();
                BinlogEventData::Rotate(rotate)
            }
            EventType::TableMapEvent => {
                let table_map = parse_table_map_event(body)?;
                self.table_maps.insert(table_map.table_id, table_map.clone());
                BinlogEventData::TableMap(table_map)
            }
            EventType::WriteRowsEvent => {
                let (common, mut cursor) = parse_rows_prefix(body)?;
                let table_map = self.table_map_for(common.table_id)?;
                let rows =
                    parse_rows(&mut cursor, table_map, &common.columns_present, common.column_count)?;
                BinlogEventData::WriteRows(WriteRowsData {
                    table_id: common.table_id,
                    flags: common.flags,
                    column_count: common.column_count as u64,
                    columns_present: common.columns_present,
                    rows,
                })
            }
            EventType::DeleteRowsEvent => {
                let (common, mut cursor) = parse_rows_prefix(body)?;
                let table_map = self.table_map_for(common.table_id)?;
                let rows =
                    parse_rows(&mut cursor, table_map, &common.columns_present, common.column_count)?;
                BinlogEventData::DeleteRows(DeleteRowsData {
                    table_id: common.table_id,
                    flags: common.flags,
                    column_count: common.column_count as u64,
                    columns_present: common.columns_present,
                    rows,
                })
            }
            EventType::UpdateRowsEvent => {
                let (common, mut cursor) = parse_rows_prefix(body)?;
                let columns_changed = read_bitmap(&mut cursor, common.column_count)?;
                let table_map = self.table_map_for(common.table_id)?;
                let mut rows = Vec::new();
                loop {
                    let Some(before) = parse_one_row(
                        &mut cursor,
                        table_map,
                        &common.columns_present,
                        common.column_count,
                    )?
                    else {
                        break;
                    };
                    let Some(after) =
                        parse_one_row(&mut cursor, table_map, &columns_changed, common.column_count)?
                    else {
                        return Err(CdcError::BinlogParseError(
                            "Update row without after image".to_string(),
                        ));
                    };
                    rows.push((before, after));
                }
                BinlogEventData::UpdateRows(UpdateRowsData {
                    table_id: common.table_id,
                    flags: common.flags,
                    column_count: common.column_count as u64,
                    columns_present: common.columns_present,
                    columns_changed,
                    rows,
                })
            }
            _ => BinlogEventData::Unknown(body.to_vec()),
        };

        Ok(BinlogEvent {
            header,
            data: parsed,
        })
    }

    fn table_map_for(&self, table_id: u64) -> Result<&TableMapData> {
        self.table_maps.get(&table_id).ok_or_else(|| {
            CdcError::BinlogParseError(format!(
                "Row event for table_id {} without TABLE_MAP",
                table_id
            ))
        })
    }
}

/// LCB (Length-Coded Binary) 읽기
fn read_lcb(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let byte = cursor.read_u8()?;
    match byte {
        0..=0xfa => Ok(byte as u64),
        0xfb => Ok(0),
        0xfc => Ok(cursor.read_u16::<LittleEndian>()? as u64),
        0xfd => Ok(cursor.read_u24::<LittleEndian>()? as u64),
        0xfe => Ok(cursor.read_u64::<LittleEndian>()?),
        0xff => Err(CdcError::BinlogParseError("Invalid LCB value".to_string())),
    }
}

fn read_bitmap(cursor: &mut Cursor<&[u8]>, bits: usize) -> Result<Vec<u8>> {
    let mut bitmap = vec![0u8; (bits + 7) / 8];
    cursor.read_exact(&mut bitmap)?;
    Ok(bitmap)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// UUID 바이트 배열을 표준 문자열로 변환
fn format_uuid(bytes: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

fn parse_rotate_event(body: &[u8]) -> Result<RotateEventData> {
    if body.len() < 8 {
        return Err(CdcError::BinlogParseError("Rotate event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let position = cursor.read_u64::<LittleEndian>()?;
    let filename = String::from_utf8_lossy(&body[8..]).to_string();
    Ok(RotateEventData {
        next_binlog_name: filename,
        position,
    })
}

fn parse_gtid_event(body: &[u8]) -> Result<GtidEventData> {
    if body.len() < 25 {
        return Err(CdcError::BinlogParseError("GTID event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let flags = cursor.read_u8()?;
    let mut uuid_bytes = [0u8; 16];
    cursor.read_exact(&mut uuid_bytes)?;
    let sequence = cursor.read_u64::<LittleEndian>()?;
    Ok(GtidEventData {
        gtid: format!("{}:{}", format_uuid(&uuid_bytes), sequence),
        committed: flags == 0,
    })
}

fn parse_incident(body: &[u8]) -> Result<IncidentData> {
    if body.len() < 3 {
        return Err(CdcError::BinlogParseError("Incident event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let code = cursor.read_u16::<LittleEndian>()?;
    let msg_len = cursor.read_u8()? as usize;
    let message = String::from_utf8_lossy(&read_bytes(&mut cursor, msg_len)?).to_string();
    Ok(IncidentData { code, message })
}

fn parse_query_event(body: &[u8]) -> Result<QueryEventData> {
    if body.len() < 13 {
        return Err(CdcError::BinlogParseError("Query event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let thread_id = cursor.read_u32::<LittleEndian>()?;
    let exec_time = cursor.read_u32::<LittleEndian>()?;
    let db_len = cursor.read_u8()? as usize;
    let _error_code = cursor.read_u16::<LittleEndian>()?;
    let status_len = cursor.read_u16::<LittleEndian>()? as usize;

    // status variables skip
    cursor.set_position(cursor.position() + status_len as u64);

    let database = String::from_utf8_lossy(&read_bytes(&mut cursor, db_len)?).to_string();
    // null terminator skip
    cursor.read_u8().ok();

    let query = String::from_utf8_lossy(&body[cursor.position() as usize..]).to_string();
    Ok(QueryEventData {
        thread_id,
        exec_time,
        database,
        query,
    })
}

fn parse_table_map_event(body: &[u8]) -> Result<TableMapData> {
    if body.len() < 8 {
        return Err(CdcError::BinlogParseError("Table map event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let table_id = cursor.read_u48::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;

    let db_len = cursor.read_u8()? as usize;
    let database = String::from_utf8_lossy(&read_bytes(&mut cursor, db_len)?).to_string();
    cursor.read_u8()?; // null terminator

    let tbl_len = cursor.read_u8()? as usize;
    let table = String::from_utf8_lossy(&read_bytes(&mut cursor, tbl_len)?).to_string();
    cursor.read_u8()?; // null terminator

    let column_count = read_lcb(&mut cursor)? as usize;
    let column_types = read_bytes(&mut cursor, column_count)?;

    let meta_len = read_lcb(&mut cursor)? as usize;
    let meta_block = read_bytes(&mut cursor, meta_len)?;
    let column_meta = parse_column_meta(&column_types, &meta_block)?;

    let nullable_bitmap = read_bitmap(&mut cursor, column_count)?;

    Ok(TableMapData {
        table_id,
        database,
        table,
        column_types,
        column_meta,
        nullable_bitmap,
    })
}

/// 컬럼 타입별 메타데이터 해석
fn parse_column_meta(column_types: &[u8], meta_block: &[u8]) -> Result<Vec<u16>> {
    let mut cursor = Cursor::new(meta_block);
    let mut meta = Vec::with_capacity(column_types.len());
    for &col_type in column_types {
        let value = match col_type {
            TYPE_VARCHAR | TYPE_BIT | TYPE_NEWDECIMAL | TYPE_STRING | TYPE_VAR_STRING => {
                cursor.read_u16::<LittleEndian>()?
            }
            TYPE_FLOAT | TYPE_DOUBLE | TYPE_BLOB | TYPE_TIMESTAMP2 | TYPE_DATETIME2
            | TYPE_TIME2 => cursor.read_u8()? as u16,
            _ => 0,
        };
        meta.push(value);
    }
    Ok(meta)
}

struct RowsPrefix {
    table_id: u64,
    flags: u16,
    column_count: usize,
    columns_present: Vec<u8>,
}

/// 행 이벤트 공통 접두부 파싱 (v2: extra data 포함)
fn parse_rows_prefix(body: &[u8]) -> Result<(RowsPrefix, Cursor<&[u8]>)> {
    if body.len() < 10 {
        return Err(CdcError::BinlogParseError("Rows event too short".to_string()));
    }
    let mut cursor = Cursor::new(body);
    let table_id = cursor.read_u48::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()? as u64;
    if extra_len > 2 {
        cursor.set_position(cursor.position() + extra_len - 2);
    }
    let column_count = read_lcb(&mut cursor)? as usize;
    let columns_present = read_bitmap(&mut cursor, column_count)?;
    Ok((
        RowsPrefix {
            table_id,
            flags,
            column_count,
            columns_present,
        },
        cursor,
    ))
}

fn parse_rows(
    cursor: &mut Cursor<&[u8]>,
    table_map: &TableMapData,
    present: &[u8],
    column_count: usize,
) -> Result<Vec<Vec<CellValue>>> {
    let mut rows = Vec::new();
    while let Some(row) = parse_one_row(cursor, table_map, present, column_count)? {
        rows.push(row);
    }
    Ok(rows)
}

/// 행 하나 파싱. 데이터가 더 없으면 None
///
/// 결과 벡터는 비트맵에 포함된 컬럼 값만 순서대로 담습니다.
fn parse_one_row(
    cursor: &mut Cursor<&[u8]>,
    table_map: &TableMapData,
    present: &[u8],
    column_count: usize,
) -> Result<Option<Vec<CellValue>>> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining == 0 {
        return Ok(None);
    }

    let present_count = (0..column_count).filter(|&i| bit_set(present, i)).count();
    let null_bitmap = read_bitmap(cursor, present_count)?;

    let mut row = Vec::with_capacity(present_count);
    let mut present_index = 0;
    for col in 0..column_count {
        if !bit_set(present, col) {
            continue;
        }
        if bit_set(&null_bitmap, present_index) {
            row.push(CellValue::Null);
        } else {
            let col_type = *table_map.column_types.get(col).ok_or_else(|| {
                CdcError::BinlogParseError(format!("Missing column type for column {}", col))
            })?;
            let meta = table_map.column_meta.get(col).copied().unwrap_or(0);
            row.push(decode_value(cursor, col_type, meta)?);
        }
        present_index += 1;
    }
    Ok(Some(row))
}

fn decode_value(cursor: &mut Cursor<&[u8]>, col_type: u8, meta: u16) -> Result<CellValue> {
    let value = match col_type {
        TYPE_NULL => CellValue::Null,
        TYPE_TINY => CellValue::Int8(cursor.read_i8()?),
        TYPE_SHORT => CellValue::Int16(cursor.read_i16::<LittleEndian>()?),
        TYPE_INT24 => {
            let raw = cursor.read_u24::<LittleEndian>()?;
            // 24비트 부호 확장
            let value = if raw & 0x80_0000 != 0 {
                (raw | 0xff00_0000) as i32
            } else {
                raw as i32
            };
            CellValue::Int32(value)
        }
        TYPE_LONG => CellValue::Int32(cursor.read_i32::<LittleEndian>()?),
        TYPE_LONGLONG => CellValue::Int64(cursor.read_i64::<LittleEndian>()?),
        TYPE_FLOAT => CellValue::Float(cursor.read_f32::<LittleEndian>()?),
        TYPE_DOUBLE => CellValue::Double(cursor.read_f64::<LittleEndian>()?),
        TYPE_YEAR => {
            let raw = cursor.read_u8()? as u16;
            CellValue::Year(if raw == 0 { 0 } else { 1900 + raw })
        }
        TYPE_DATE => {
            let raw = cursor.read_u24::<LittleEndian>()?;
            let day = raw & 0x1f;
            let month = (raw >> 5) & 0x0f;
            let year = raw >> 9;
            CellValue::Date(format!("{:04}-{:02}-{:02}", year, month, day))
        }
        TYPE_TIME2 => {
            let raw = cursor.read_u24::<BigEndian>()? as i64 - 0x80_0000;
            let (sign, v) = if raw < 0 { ("-", -raw) } else { ("", raw) };
            let hours = (v >> 12) & 0x3ff;
            let minutes = (v >> 6) & 0x3f;
            let seconds = v & 0x3f;
            skip_fractional(cursor, meta)?;
            CellValue::Time(format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds))
        }
        TYPE_TIMESTAMP2 => {
            let seconds = cursor.read_u32::<BigEndian>()? as i64;
            skip_fractional(cursor, meta)?;
            match chrono::Utc.timestamp_opt(seconds, 0).single() {
                Some(dt) => CellValue::DateTime(dt),
                None => CellValue::Null,
            }
        }
        TYPE_DATETIME2 => {
            let mut raw = [0u8; 5];
            cursor.read_exact(&mut raw)?;
            let packed = ((raw[0] as u64) << 32)
                | ((raw[1] as u64) << 24)
                | ((raw[2] as u64) << 16)
                | ((raw[3] as u64) << 8)
                | raw[4] as u64;
            let v = packed as i64 - 0x80_0000_0000;
            let ym = (v >> 22) & 0x1ffff;
            let year = (ym / 13) as i32;
            let month = (ym % 13) as u32;
            let day = ((v >> 17) & 0x1f) as u32;
            let hour = ((v >> 12) & 0x1f) as u32;
            let minute = ((v >> 6) & 0x3f) as u32;
            let second = (v & 0x3f) as u32;
            skip_fractional(cursor, meta)?;
            match chrono::Utc
                .with_ymd_and_hms(year, month, day, hour, minute, second)
                .single()
            {
                Some(dt) => CellValue::DateTime(dt),
                None => CellValue::Null,
            }
        }
        TYPE_VARCHAR | TYPE_VAR_STRING | TYPE_STRING => {
            let len = if meta < 256 {
                cursor.read_u8()? as usize
            } else {
                cursor.read_u16::<LittleEndian>()? as usize
            };
            CellValue::String(String::from_utf8_lossy(&read_bytes(cursor, len)?).to_string())
        }
        TYPE_BLOB => {
            let len_size = meta.clamp(1, 4);
            let mut len = 0usize;
            for i in 0..len_size {
                len |= (cursor.read_u8()? as usize) << (8 * i);
            }
            CellValue::Bytes(read_bytes(cursor, len)?)
        }
        other => {
            return Err(CdcError::BinlogParseError(format!(
                "Unsupported column type: {}",
                other
            )))
        }
    };
    Ok(value)
}

/// TIME2/DATETIME2/TIMESTAMP2의 소수 초 바이트 건너뛰기
fn skip_fractional(cursor: &mut Cursor<&[u8]>, fsp: u16) -> Result<()> {
    let bytes = (fsp as u64 + 1) / 2;
    cursor.set_position(cursor.position() + bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn header_bytes(event_type: u8, next_pos: u32) -> Vec<u8> {
        let mut h = Vec::new();
        h.write_u32::<LittleEndian>(1_700_000_100).unwrap(); // timestamp
        h.write_u8(event_type).unwrap();
        h.write_u32::<LittleEndian>(1).unwrap(); // server_id
        h.write_u32::<LittleEndian>(0).unwrap(); // event_length
        h.write_u32::<LittleEndian>(next_pos).unwrap();
        h.write_u16::<LittleEndian>(0).unwrap(); // flags
        h
    }

    /// 컬럼 (INT, VARCHAR(10)) 테이블의 TABLE_MAP 이벤트
    fn table_map_bytes(table_id: u64) -> Vec<u8> {
        let mut e = header_bytes(19, 200);
        e.write_u48::<LittleEndian>(table_id).unwrap();
        e.write_u16::<LittleEndian>(1).unwrap(); // flags
        e.write_u8(2).unwrap(); // db len
        e.write_all(b"db").unwrap();
        e.write_u8(0).unwrap();
        e.write_u8(1).unwrap(); // table len
        e.write_all(b"t").unwrap();
        e.write_u8(0).unwrap();
        e.write_u8(2).unwrap(); // column count (lcb)
        e.write_all(&[TYPE_LONG, TYPE_VARCHAR]).unwrap();
        e.write_u8(2).unwrap(); // meta length (lcb)
        e.write_u16::<LittleEndian>(10).unwrap(); // varchar max length
        e.write_u8(0b10).unwrap(); // nullable bitmap
        e
    }

    fn rows_prefix(event_type: u8, table_id: u64, present: u8) -> Vec<u8> {
        let mut e = header_bytes(event_type, 300);
        e.write_u48::<LittleEndian>(table_id).unwrap();
        e.write_u16::<LittleEndian>(0).unwrap(); // flags
        e.write_u16::<LittleEndian>(2).unwrap(); // extra data length (없음)
        e.write_u8(2).unwrap(); // column count
        e.write_u8(present).unwrap();
        e
    }

    fn push_row(e: &mut Vec<u8>, id: i32, name: &str) {
        e.write_u8(0).unwrap(); // null bitmap
        e.write_i32::<LittleEndian>(id).unwrap();
        e.write_u8(name.len() as u8).unwrap();
        e.write_all(name.as_bytes()).unwrap();
    }

    #[test]
    fn test_verify_magic() {
        assert!(BinlogParser::verify_magic(&[0xfe, 0x62, 0x69, 0x6e]).is_ok());
        assert!(BinlogParser::verify_magic(&[0, 0, 0, 0]).is_err());
        assert!(BinlogParser::verify_magic(&[0xfe]).is_err());
    }

    #[test]
    fn test_parse_header() {
        let bytes = header_bytes(4, 1234);
        let (header, consumed) = BinlogParser::parse_header(&bytes).unwrap();
        assert_eq!(consumed, 19);
        assert_eq!(header.event_type, EventType::RotateEvent);
        assert_eq!(header.next_pos, 1234);
        assert_eq!(header.server_id, 1);
    }

    #[test]
    fn test_parse_rotate() {
        let mut e = header_bytes(4, 0);
        e.write_u64::<LittleEndian>(4).unwrap();
        e.write_all(b"mysql-bin.000002").unwrap();

        let mut parser = BinlogParser::new();
        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::Rotate(rotate) => {
                assert_eq!(rotate.next_binlog_name, "mysql-bin.000002");
                assert_eq!(rotate.position, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_query() {
        let sql = b"CREATE TABLE t (a INT)";
        let mut e = header_bytes(2, 500);
        e.write_u32::<LittleEndian>(7).unwrap(); // thread_id
        e.write_u32::<LittleEndian>(0).unwrap(); // exec_time
        e.write_u8(2).unwrap(); // db len
        e.write_u16::<LittleEndian>(0).unwrap(); // error code
        e.write_u16::<LittleEndian>(0).unwrap(); // status length
        e.write_all(b"db").unwrap();
        e.write_u8(0).unwrap();
        e.write_all(sql).unwrap();

        let mut parser = BinlogParser::new();
        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::Query(query) => {
                assert_eq!(query.thread_id, 7);
                assert_eq!(query.database, "db");
                assert_eq!(query.query, "CREATE TABLE t (a INT)");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_gtid() {
        let mut e = header_bytes(33, 150);
        e.write_u8(0).unwrap(); // flags
        e.write_all(&[
            0x55, 0x0e, 0x84, 0x00, 0xe2, 0x9b, 0x41, 0xd4, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44,
            0x00, 0x00,
        ])
        .unwrap();
        e.write_u64::<LittleEndian>(5).unwrap();

        let mut parser = BinlogParser::new();
        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::Gtid(gtid) => {
                assert_eq!(gtid.gtid, "550e8400-e29b-41d4-a716-446655440000:5");
                assert!(gtid.committed);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_table_map_and_write_rows() {
        let mut parser = BinlogParser::new();
        parser.parse_event(&table_map_bytes(42)).unwrap();

        let mut e = rows_prefix(30, 42, 0b11);
        push_row(&mut e, 1, "a");
        push_row(&mut e, 2, "bb");

        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::WriteRows(write) => {
                assert_eq!(write.table_id, 42);
                assert_eq!(write.rows.len(), 2);
                assert_eq!(write.rows[0][0], CellValue::Int32(1));
                assert_eq!(write.rows[0][1], CellValue::String("a".to_string()));
                assert_eq!(write.rows[1][1], CellValue::String("bb".to_string()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_update_rows() {
        let mut parser = BinlogParser::new();
        parser.parse_event(&table_map_bytes(7)).unwrap();

        let mut e = rows_prefix(31, 7, 0b11);
        e.write_u8(0b11).unwrap(); // columns_changed bitmap
        push_row(&mut e, 1, "x");
        push_row(&mut e, 1, "y");

        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::UpdateRows(update) => {
                assert_eq!(update.rows.len(), 1);
                let (before, after) = &update.rows[0];
                assert_eq!(before[1], CellValue::String("x".to_string()));
                assert_eq!(after[1], CellValue::String("y".to_string()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_row_with_null() {
        let mut parser = BinlogParser::new();
        parser.parse_event(&table_map_bytes(9)).unwrap();

        let mut e = rows_prefix(32, 9, 0b11);
        e.write_u8(0b10).unwrap(); // 두 번째 컬럼 NULL
        e.write_i32::<LittleEndian>(5).unwrap();

        let event = parser.parse_event(&e).unwrap();
        match event.data {
            BinlogEventData::DeleteRows(delete) => {
                assert_eq!(delete.rows.len(), 1);
                assert_eq!(delete.rows[0][0], CellValue::Int32(5));
                assert_eq!(delete.rows[0][1], CellValue::Null);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rows_without_table_map_is_error() {
        let mut parser = BinlogParser::new();
        let mut e = rows_prefix(30, 99, 0b11);
        push_row(&mut e, 1, "a");
        assert!(matches!(
            parser.parse_event(&e),
            Err(CdcError::BinlogParseError(_))
        ));
    }

    #[test]
    fn test_rotate_clears_table_maps() {
        let mut parser = BinlogParser::new();
        parser.parse_event(&table_map_bytes(42)).unwrap();

        let mut rotate = header_bytes(4, 0);
        rotate.write_u64::<LittleEndian>(4).unwrap();
        rotate.write_all(b"mysql-bin.000002").unwrap();
        parser.parse_event(&rotate).unwrap();

        let mut e = rows_prefix(30, 42, 0b11);
        push_row(&mut e, 1, "a");
        assert!(parser.parse_event(&e).is_err());
    }

    #[test]
    fn test_unknown_event_type_keeps_payload() {
        let mut e = header_bytes(100, 700);
        e.write_all(&[1, 2, 3]).unwrap();
        let mut parser = BinlogParser::new();
        let event = parser.parse_event(&e).unwrap();
        assert_eq!(event.header.event_type, EventType::Unknown);
        assert!(matches!(event.data, BinlogEventData::Unknown(ref p) if p == &vec![1, 2, 3]));
    }

    #[test]
    fn test_read_lcb() {
        let data: &[u8] = &[0x0a];
        assert_eq!(read_lcb(&mut Cursor::new(data)).unwrap(), 10);

        let data: &[u8] = &[0xfc, 0x10, 0x27];
        assert_eq!(read_lcb(&mut Cursor::new(data)).unwrap(), 10000);

        let data: &[u8] = &[0xfb];
        assert_eq!(read_lcb(&mut Cursor::new(data)).unwrap(), 0);

        let data: &[u8] = &[0xff];
        assert!(read_lcb(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_int24_sign_extension() {
        let data: &[u8] = &[0xff, 0xff, 0xff];
        let mut cursor = Cursor::new(data);
        assert_eq!(
            decode_value(&mut cursor, TYPE_INT24, 0).unwrap(),
            CellValue::Int32(-1)
        );
    }
}
