//! 테이블 번호 바인딩 관리
//!
//! TABLE_MAP 이벤트의 일시적 테이블 번호를 논리적 테이블 식별자에 바인딩하고,
//! 행 이벤트가 사용할 컬럼 프로젝션을 (번호, 포함 컬럼 비트맵) 키로 캐시합니다.
//! 바인딩은 binlog 파일 하나 안에서만 유효하며 ROTATE 시 전부 무효화됩니다.

use crate::schema::{SchemaSnapshot, TableId};
use std::collections::HashMap;
use tracing::trace;

/// 캡처 대상 테이블 필터
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    /// 포함할 데이터베이스들 (비어 있으면 전체)
    pub databases: Vec<String>,
    /// 포함할 테이블명들 (None이면 전체)
    pub tables: Option<Vec<String>>,
}

impl TableFilter {
    pub fn matches(&self, id: &TableId) -> bool {
        if !self.databases.is_empty() && !self.databases.contains(&id.database) {
            return false;
        }
        match &self.tables {
            Some(tables) => tables.contains(&id.table),
            None => true,
        }
    }
}

/// 특정 테이블 번호 + 컬럼 프로젝션에 대한 레코드 생성 정보
#[derive(Debug, Clone)]
pub struct RecordsForTable {
    pub table_id: TableId,
    /// 비트맵에 포함된 컬럼들의 이름 (행 벡터와 같은 순서)
    pub columns: Vec<String>,
}

/// 테이블 번호 -> 논리 테이블 바인딩 맵
///
/// 디스패처(수신 컨텍스트)가 단독으로 소유합니다.
#[derive(Default)]
pub struct TableIdMap {
    /// None은 필터에서 제외된 테이블의 바인딩 (행 이벤트를 조용히 건너뜀)
    bindings: HashMap<u64, Option<TableId>>,
    cache: HashMap<(u64, Vec<u8>), RecordsForTable>,
}

impl TableIdMap {
    pub fn new() -> Self {
        TableIdMap::default()
    }

    /// 번호를 테이블에 바인딩. 필터를 통과하면 true
    ///
    /// 같은 번호가 다시 바인딩되면 (DDL로 재맵) 기존 캐시는 무효화됩니다.
    pub fn assign(&mut self, table_number: u64, table_id: TableId, filter: &TableFilter) -> bool {
        self.cache.retain(|(number, _), _| *number != table_number);
        if filter.matches(&table_id) {
            self.bindings.insert(table_number, Some(table_id));
            true
        } else {
            trace!("Table {} filtered out (table_number={})", table_id, table_number);
            self.bindings.insert(table_number, None);
            false
        }
    }

    /// 행 이벤트용 프로젝션 조회
    ///
    /// 알 수 없는 번호(TABLE_MAP 유실 또는 필터 제외)는 None을 반환하며
    /// 에러가 아닙니다. 프로젝션은 (번호, 비트맵) 단위로 캐시되고, 비트맵이
    /// 바뀌면 다시 유도됩니다.
    pub fn for_table(
        &mut self,
        table_number: u64,
        included_columns: &[u8],
        column_count: usize,
        snapshot: &SchemaSnapshot,
    ) -> Option<RecordsForTable> {
        let binding = match self.bindings.get(&table_number) {
            Some(binding) => binding,
            None => {
                trace!("No binding for table_number={}", table_number);
                return None;
            }
        };
        let table_id = binding.as_ref()?;

        let key = (table_number, included_columns.to_vec());
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached.clone());
        }

        let columns = project_columns(snapshot, table_id, included_columns, column_count);
        let records = RecordsForTable {
            table_id: table_id.clone(),
            columns,
        };
        self.cache.insert(key, records.clone());
        Some(records)
    }

    /// 모든 바인딩과 캐시 무효화 (ROTATE 시)
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub(crate) fn bit_set(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .is_some_and(|byte| byte & (1u8 << (index % 8)) != 0)
}

/// 포함 비트맵이 가리키는 컬럼들의 이름 목록
///
/// 스냅샷이 테이블을 모르는 경우 (DDL을 아직 보지 못함) 위치 기반 이름을 씁니다.
fn project_columns(
    snapshot: &SchemaSnapshot,
    table_id: &TableId,
    included: &[u8],
    column_count: usize,
) -> Vec<String> {
    let def = snapshot.table(table_id);
    let mut names = Vec::new();
    for i in 0..column_count {
        if !bit_set(included, i) {
            continue;
        }
        let name = def
            .and_then(|d| d.columns.get(i))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("col{}", i));
        names.push(name);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaTracker;

    fn filter_all() -> TableFilter {
        TableFilter::default()
    }

    #[test]
    fn test_assign_and_lookup() {
        let mut map = TableIdMap::new();
        let snapshot = SchemaSnapshot::default();
        assert!(map.assign(42, TableId::new("db1", "t"), &filter_all()));

        let records = map.for_table(42, &[0b0000_0011], 2, &snapshot).unwrap();
        assert_eq!(records.table_id, TableId::new("db1", "t"));
        assert_eq!(records.columns, vec!["col0", "col1"]);
    }

    #[test]
    fn test_lookup_unknown_number() {
        let mut map = TableIdMap::new();
        let snapshot = SchemaSnapshot::default();
        assert!(map.for_table(7, &[0xff], 3, &snapshot).is_none());
    }

    #[test]
    fn test_filtered_table_is_negative_binding() {
        let mut map = TableIdMap::new();
        let snapshot = SchemaSnapshot::default();
        let filter = TableFilter {
            databases: vec!["keep".to_string()],
            tables: None,
        };
        assert!(!map.assign(5, TableId::new("skip", "t"), &filter));
        // 바인딩은 기록되지만 조회는 None
        assert_eq!(map.len(), 1);
        assert!(map.for_table(5, &[0xff], 1, &snapshot).is_none());
    }

    #[test]
    fn test_clear_invalidates_bindings() {
        let mut map = TableIdMap::new();
        let snapshot = SchemaSnapshot::default();
        map.assign(5, TableId::new("d", "t"), &filter_all());
        map.for_table(5, &[0xff], 1, &snapshot).unwrap();

        map.clear();
        assert!(map.is_empty());
        assert!(map.for_table(5, &[0xff], 1, &snapshot).is_none());
    }

    #[test]
    fn test_projection_uses_schema_names() {
        let mut tracker = SchemaTracker::new();
        tracker
            .apply_ddl("d", "CREATE TABLE t (id INT, name VARCHAR(10), age INT)")
            .unwrap();

        let mut map = TableIdMap::new();
        map.assign(9, TableId::new("d", "t"), &filter_all());

        // 1번 비트 (name) 빠진 프로젝션
        let records = map
            .for_table(9, &[0b0000_0101], 3, tracker.snapshot())
            .unwrap();
        assert_eq!(records.columns, vec!["id", "age"]);
    }

    #[test]
    fn test_cache_rekeys_on_bitmap_change() {
        let mut tracker = SchemaTracker::new();
        tracker.apply_ddl("d", "CREATE TABLE t (a INT, b INT)").unwrap();

        let mut map = TableIdMap::new();
        map.assign(3, TableId::new("d", "t"), &filter_all());

        let full = map.for_table(3, &[0b11], 2, tracker.snapshot()).unwrap();
        assert_eq!(full.columns, vec!["a", "b"]);

        let partial = map.for_table(3, &[0b01], 2, tracker.snapshot()).unwrap();
        assert_eq!(partial.columns, vec!["a"]);
    }

    #[test]
    fn test_reassign_invalidates_cache() {
        let mut tracker = SchemaTracker::new();
        tracker.apply_ddl("d", "CREATE TABLE t (a INT)").unwrap();
        tracker.apply_ddl("d", "CREATE TABLE u (x INT)").unwrap();

        let mut map = TableIdMap::new();
        map.assign(3, TableId::new("d", "t"), &filter_all());
        let before = map.for_table(3, &[0b1], 1, tracker.snapshot()).unwrap();
        assert_eq!(before.columns, vec!["a"]);

        // 같은 번호가 다른 테이블로 재맵되면 캐시도 새로 유도
        map.assign(3, TableId::new("d", "u"), &filter_all());
        let after = map.for_table(3, &[0b1], 1, tracker.snapshot()).unwrap();
        assert_eq!(after.columns, vec!["x"]);
    }

    #[test]
    fn test_bit_set() {
        assert!(bit_set(&[0b0000_0001], 0));
        assert!(bit_set(&[0b0000_0000, 0b0000_0001], 8));
        assert!(!bit_set(&[0b0000_0001], 1));
        assert!(!bit_set(&[0xff], 8));
    }
}
