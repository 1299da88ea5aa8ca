//! 변경 레코드 생성
//!
//! 행 이벤트의 raw 행 튜플을 타입이 붙은 변경 레코드로 변환하여 다운스트림
//! 큐에 넣습니다. 레코드마다 그 시점 커서의 오프셋 스냅샷이 동결되어 붙습니다.

use crate::error::Result;
use crate::events::CellValue;
use crate::offset::SourceInfo;
use crate::queue::RecordSender;
use crate::schema::TableId;
use crate::table_map::{RecordsForTable, TableFilter, TableIdMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 변경 연산 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Ddl,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Ddl => "ddl",
        }
    }
}

/// 다운스트림으로 내보내는 변경 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub op: Operation,
    pub database: String,
    /// DDL 레코드는 빈 문자열
    pub table: String,
    /// 변경 전 이미지 (update/delete)
    pub before: Option<HashMap<String, CellValue>>,
    /// 변경 후 이미지 (create/update)
    pub after: Option<HashMap<String, CellValue>>,
    /// DDL 레코드의 문장들
    pub statements: Option<Vec<String>>,
    pub ts: DateTime<Utc>,
    /// 이 레코드를 내보낸 시점의 오프셋 맵 (동결 복사본)
    pub source: serde_json::Value,
}

/// 레코드 생성기
///
/// 테이블 번호 바인딩을 소유하며, 수신 컨텍스트에서만 사용됩니다.
/// 모든 emit은 큐 공간이 생길 때까지 대기합니다 (backpressure).
pub struct RecordMakers {
    table_map: TableIdMap,
    filter: TableFilter,
    tx: RecordSender,
}

impl RecordMakers {
    pub fn new(filter: TableFilter, tx: RecordSender) -> Self {
        RecordMakers {
            table_map: TableIdMap::new(),
            filter,
            tx,
        }
    }

    /// TABLE_MAP 이벤트의 바인딩 등록. 필터 통과 시 true
    pub fn assign(&mut self, table_number: u64, table_id: TableId) -> bool {
        self.table_map.assign(table_number, table_id, &self.filter)
    }

    /// 행 이벤트용 프로젝션 조회 (없으면 None: 행 이벤트 무시)
    pub fn for_table(
        &mut self,
        table_number: u64,
        included_columns: &[u8],
        column_count: usize,
        snapshot: &crate::schema::SchemaSnapshot,
    ) -> Option<RecordsForTable> {
        self.table_map
            .for_table(table_number, included_columns, column_count, snapshot)
    }

    /// 모든 바인딩 무효화 (ROTATE 시)
    pub fn clear(&mut self) {
        self.table_map.clear();
    }

    /// 행마다 create 레코드 하나씩 emit. 내보낸 개수 반환
    ///
    /// 각 행을 내보낸 뒤 커서의 행 번호를 전진시켜, 이벤트 내에서
    /// row_in_event가 0,1,2,...로 증가합니다.
    pub async fn create_each(
        &self,
        records: &RecordsForTable,
        rows: &[Vec<CellValue>],
        ts: DateTime<Utc>,
        source: &mut SourceInfo,
    ) -> Result<usize> {
        let mut count = 0;
        for row in rows {
            let record = ChangeRecord {
                op: Operation::Create,
                database: records.table_id.database.clone(),
                table: records.table_id.table.clone(),
                before: None,
                after: Some(named_row(&records.columns, row)),
                statements: None,
                ts,
                source: source.to_offset(),
            };
            self.tx.enqueue(record).await?;
            source.advance_row();
            count += 1;
        }
        Ok(count)
    }

    /// before/after 이미지를 담은 update 레코드 하나 emit
    ///
    /// `row_index`로 커서의 행 번호를 고정한 뒤 내보냅니다.
    pub async fn update(
        &self,
        records: &RecordsForTable,
        before: &[CellValue],
        after: &[CellValue],
        ts: DateTime<Utc>,
        row_index: u32,
        source: &mut SourceInfo,
    ) -> Result<usize> {
        source.set_row_in_event(row_index);
        let record = ChangeRecord {
            op: Operation::Update,
            database: records.table_id.database.clone(),
            table: records.table_id.table.clone(),
            before: Some(named_row(&records.columns, before)),
            after: Some(named_row(&records.columns, after)),
            statements: None,
            ts,
            source: source.to_offset(),
        };
        self.tx.enqueue(record).await?;
        Ok(1)
    }

    /// 행마다 delete 레코드 하나씩 emit. 내보낸 개수 반환
    pub async fn delete_each(
        &self,
        records: &RecordsForTable,
        rows: &[Vec<CellValue>],
        ts: DateTime<Utc>,
        source: &mut SourceInfo,
    ) -> Result<usize> {
        let mut count = 0;
        for row in rows {
            let record = ChangeRecord {
                op: Operation::Delete,
                database: records.table_id.database.clone(),
                table: records.table_id.table.clone(),
                before: Some(named_row(&records.columns, row)),
                after: None,
                statements: None,
                ts,
                source: source.to_offset(),
            };
            self.tx.enqueue(record).await?;
            source.advance_row();
            count += 1;
        }
        Ok(count)
    }

    /// 스키마 변경 레코드 emit (이벤트당 하나)
    pub async fn schema_changes(
        &self,
        database: &str,
        statements: &[String],
        ts: DateTime<Utc>,
        source: &SourceInfo,
    ) -> Result<usize> {
        if statements.is_empty() {
            return Ok(0);
        }
        let record = ChangeRecord {
            op: Operation::Ddl,
            database: database.to_string(),
            table: String::new(),
            before: None,
            after: None,
            statements: Some(statements.to_vec()),
            ts,
            source: source.to_offset(),
        };
        self.tx.enqueue(record).await?;
        Ok(1)
    }
}

/// 컬럼 이름과 값을 짝지어 이름 붙은 행으로 변환
///
/// 프로젝션과 행 길이가 어긋나면 짧은 쪽까지만 짝짓습니다.
fn named_row(columns: &[String], values: &[CellValue]) -> HashMap<String, CellValue> {
    columns
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::BinlogPosition;
    use crate::queue::change_event_queue;
    use crate::schema::SchemaSnapshot;

    fn setup() -> (RecordMakers, crate::queue::ChangeEventQueue, SourceInfo) {
        let (tx, queue) = change_event_queue(64);
        let makers = RecordMakers::new(TableFilter::default(), tx);
        let source = SourceInfo::new(1, BinlogPosition::start_of("mysql-bin.000001"));
        (makers, queue, source)
    }

    fn records_for(makers: &mut RecordMakers, number: u64) -> RecordsForTable {
        makers.assign(number, TableId::new("d", "t"));
        makers
            .for_table(number, &[0b11], 2, &SchemaSnapshot::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_each_emits_one_record_per_row() {
        let (mut makers, queue, mut source) = setup();
        let rft = records_for(&mut makers, 42);

        let rows = vec![
            vec![CellValue::Int32(1), CellValue::String("a".to_string())],
            vec![CellValue::Int32(2), CellValue::String("b".to_string())],
        ];
        let count = makers
            .create_each(&rft, &rows, Utc::now(), &mut source)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let first = queue.poll().await.unwrap();
        assert_eq!(first.op, Operation::Create);
        assert_eq!(first.source["row"], 0);
        assert_eq!(
            first.after.as_ref().unwrap()["col0"],
            CellValue::Int32(1)
        );

        let second = queue.poll().await.unwrap();
        assert_eq!(second.source["row"], 1);
        assert!(second.before.is_none());
    }

    #[tokio::test]
    async fn test_update_pins_row_index() {
        let (mut makers, queue, mut source) = setup();
        let rft = records_for(&mut makers, 7);

        makers
            .update(
                &rft,
                &[CellValue::Int32(1), CellValue::String("x".to_string())],
                &[CellValue::Int32(1), CellValue::String("y".to_string())],
                Utc::now(),
                0,
                &mut source,
            )
            .await
            .unwrap();
        makers
            .update(
                &rft,
                &[CellValue::Int32(2), CellValue::String("p".to_string())],
                &[CellValue::Int32(2), CellValue::String("q".to_string())],
                Utc::now(),
                1,
                &mut source,
            )
            .await
            .unwrap();

        let first = queue.poll().await.unwrap();
        assert_eq!(first.source["row"], 0);
        assert_eq!(
            first.before.as_ref().unwrap()["col1"],
            CellValue::String("x".to_string())
        );
        assert_eq!(
            first.after.as_ref().unwrap()["col1"],
            CellValue::String("y".to_string())
        );

        let second = queue.poll().await.unwrap();
        assert_eq!(second.source["row"], 1);
    }

    #[tokio::test]
    async fn test_delete_each_carries_before_image() {
        let (mut makers, queue, mut source) = setup();
        let rft = records_for(&mut makers, 9);

        let rows = vec![vec![CellValue::Int32(5), CellValue::Null]];
        let count = makers
            .delete_each(&rft, &rows, Utc::now(), &mut source)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let record = queue.poll().await.unwrap();
        assert_eq!(record.op, Operation::Delete);
        assert!(record.after.is_none());
        assert_eq!(
            record.before.as_ref().unwrap()["col0"],
            CellValue::Int32(5)
        );
    }

    #[tokio::test]
    async fn test_frozen_offsets_are_independent() {
        let (mut makers, queue, mut source) = setup();
        let rft = records_for(&mut makers, 11);

        let rows = vec![vec![CellValue::Int32(1)], vec![CellValue::Int32(2)]];
        makers
            .create_each(&rft, &rows, Utc::now(), &mut source)
            .await
            .unwrap();

        // 커서가 전진해도 이미 내보낸 레코드의 오프셋은 변하지 않음
        source.update_next_position(9999);

        let first = queue.poll().await.unwrap();
        let second = queue.poll().await.unwrap();
        assert_eq!(first.source["pos"], 4);
        assert_eq!(first.source["row"], 0);
        assert_eq!(second.source["row"], 1);
    }

    #[tokio::test]
    async fn test_schema_changes_record() {
        let (makers, queue, source) = setup();
        let count = makers
            .schema_changes(
                "d",
                &["ALTER TABLE t ADD c INT".to_string()],
                Utc::now(),
                &source,
            )
            .await
            .unwrap();
        assert_eq!(count, 1);

        let record = queue.poll().await.unwrap();
        assert_eq!(record.op, Operation::Ddl);
        assert_eq!(record.database, "d");
        assert!(record.table.is_empty());
        assert_eq!(
            record.statements.as_ref().unwrap()[0],
            "ALTER TABLE t ADD c INT"
        );
    }

    #[tokio::test]
    async fn test_schema_changes_empty_is_noop() {
        let (makers, _queue, source) = setup();
        let count = makers.schema_changes("d", &[], Utc::now(), &source).await.unwrap();
        assert_eq!(count, 0);
    }
}
