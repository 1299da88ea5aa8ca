//! 스키마 추적 (DDL 해석 및 테이블 정의 관리)
//!
//! QUERY 이벤트의 DDL을 해석하여 메모리 내 스키마 스냅샷을 진화시킵니다.
//! 이후의 행 이벤트는 이 스냅샷으로 컬럼 이름과 타입을 얻습니다.

use crate::error::{CdcError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// 논리적 테이블 식별자
///
/// MySQL은 database가 곧 schema이므로 (database, table) 쌍으로 충분합니다.
/// 재시작 후에도 안정적으로 유지됩니다 (테이블 번호와 대조).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub database: String,
    pub table: String,
}

impl TableId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        TableId {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// 컬럼 정의
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// 선언된 타입 텍스트 (e.g., "INT", "VARCHAR(100)")
    pub col_type: String,
    pub nullable: bool,
    /// 테이블 내 순서 (0부터)
    pub ordinal: u32,
    pub default: Option<String>,
}

/// 테이블 정의
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn renumber(&mut self) {
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.ordinal = i as u32;
        }
    }
}

/// 전체 스키마 스냅샷 (DDL 적용으로만 변경)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: HashMap<TableId, TableDef>,
}

impl SchemaSnapshot {
    pub fn table(&self, id: &TableId) -> Option<&TableDef> {
        self.tables.get(id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// 스냅샷에 적용 가능한 구조 변경
#[derive(Debug, Clone)]
enum DdlOp {
    CreateTable { id: TableId, columns: Vec<ColumnDef> },
    AddColumn { id: TableId, column: ColumnDef },
    DropColumn { id: TableId, name: String },
    ModifyColumn { id: TableId, column: ColumnDef },
    DropTable { id: TableId },
}

enum StatementKind {
    /// DML, BEGIN/COMMIT 등 스키마와 무관한 문장
    NotDdl,
    /// DDL 문장. op가 None이면 컬럼 구조에 영향 없는 DDL (CREATE INDEX 등)
    Ddl(Option<DdlOp>),
}

/// DDL 해석기 + 스냅샷 소유자
///
/// 이벤트 단위로 원자적으로 적용합니다: 이벤트의 모든 문장이 해석에 성공해야
/// 스냅샷이 변경되며, 하나라도 실패하면 `SchemaParseError`와 함께 스냅샷은
/// 그대로 남습니다.
pub struct SchemaTracker {
    snapshot: SchemaSnapshot,
    re_create: Regex,
    re_alter: Regex,
    re_drop: Regex,
    re_ddl_prefix: Regex,
}

impl Default for SchemaTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaTracker {
    pub fn new() -> Self {
        SchemaTracker {
            snapshot: SchemaSnapshot::default(),
            re_create: Regex::new(
                r"(?is)^CREATE\s+(?:TEMPORARY\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([`\w.]+)\s*\((.+)\)[^()]*$",
            )
            .unwrap(),
            re_alter: Regex::new(r"(?is)^ALTER\s+TABLE\s+([`\w.]+)\s+(.+)$").unwrap(),
            re_drop: Regex::new(r"(?is)^DROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?([`\w.]+)").unwrap(),
            re_ddl_prefix: Regex::new(r"(?is)^(?:CREATE|ALTER|DROP|RENAME|TRUNCATE)\b").unwrap(),
        }
    }

    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    /// QUERY 이벤트의 SQL을 적용하고, 적용된 DDL 문장 텍스트들을 반환
    ///
    /// 반환이 비어 있으면 DDL이 아닌 쿼리였다는 뜻입니다.
    pub fn apply_ddl(&mut self, database: &str, sql: &str) -> Result<Vec<String>> {
        // 1단계: 전부 해석 (실패 시 스냅샷 무변경)
        let mut parsed: Vec<(String, Option<DdlOp>)> = Vec::new();
        for stmt in split_statements(sql) {
            match self.classify(database, &stmt)? {
                StatementKind::NotDdl => {}
                StatementKind::Ddl(op) => parsed.push((stmt, op)),
            }
        }

        // 2단계: 적용 (실패할 수 없는 연산들)
        let mut applied = Vec::with_capacity(parsed.len());
        for (stmt, op) in parsed {
            if let Some(op) = op {
                self.apply_op(op);
            }
            applied.push(stmt);
        }
        Ok(applied)
    }

    fn classify(&self, database: &str, stmt: &str) -> Result<StatementKind> {
        if !self.re_ddl_prefix.is_match(stmt) {
            return Ok(StatementKind::NotDdl);
        }

        if let Some(caps) = self.re_create.captures(stmt) {
            let id = parse_table_ident(database, &caps[1]);
            let columns = parse_column_list(&caps[2])?;
            if columns.is_empty() {
                return Err(CdcError::SchemaParseError(format!(
                    "CREATE TABLE without columns: {}",
                    stmt
                )));
            }
            return Ok(StatementKind::Ddl(Some(DdlOp::CreateTable { id, columns })));
        }

        if let Some(caps) = self.re_alter.captures(stmt) {
            let id = parse_table_ident(database, &caps[1]);
            return self.classify_alter(id, &caps[2], stmt);
        }

        if let Some(caps) = self.re_drop.captures(stmt) {
            let id = parse_table_ident(database, &caps[1]);
            return Ok(StatementKind::Ddl(Some(DdlOp::DropTable { id })));
        }

        let upper = stmt.trim().to_uppercase();
        if upper.starts_with("CREATE TABLE") || upper.starts_with("ALTER TABLE") {
            // DDL로 시작했지만 형태를 알아볼 수 없음
            return Err(CdcError::SchemaParseError(format!(
                "Unrecognized DDL statement: {}",
                stmt
            )));
        }

        // RENAME/TRUNCATE/CREATE INDEX 등: 기록은 하되 컬럼 구조는 불변
        Ok(StatementKind::Ddl(None))
    }

    fn classify_alter(&self, id: TableId, action: &str, stmt: &str) -> Result<StatementKind> {
        let action = action.trim();
        let upper = action.to_uppercase();

        if let Some(rest) = strip_keyword(action, &upper, &["ADD"]) {
            let rest_upper = rest.trim().to_uppercase();
            if rest_upper.starts_with("INDEX")
                || rest_upper.starts_with("KEY")
                || rest_upper.starts_with("UNIQUE")
                || rest_upper.starts_with("PRIMARY")
                || rest_upper.starts_with("CONSTRAINT")
                || rest_upper.starts_with("FOREIGN")
            {
                return Ok(StatementKind::Ddl(None));
            }
            let spec = strip_column_keyword(rest);
            let column = parse_column_spec(spec, 0)?;
            return Ok(StatementKind::Ddl(Some(DdlOp::AddColumn { id, column })));
        }

        if let Some(rest) = strip_keyword(action, &upper, &["DROP"]) {
            let rest_upper = rest.trim().to_uppercase();
            if rest_upper.starts_with("INDEX")
                || rest_upper.starts_with("KEY")
                || rest_upper.starts_with("PRIMARY")
                || rest_upper.starts_with("FOREIGN")
                || rest_upper.starts_with("CONSTRAINT")
            {
                return Ok(StatementKind::Ddl(None));
            }
            let spec = strip_column_keyword(rest);
            let name = unquote(spec.split_whitespace().next().unwrap_or(""));
            if name.is_empty() {
                return Err(CdcError::SchemaParseError(format!(
                    "ALTER TABLE DROP without column name: {}",
                    stmt
                )));
            }
            return Ok(StatementKind::Ddl(Some(DdlOp::DropColumn { id, name })));
        }

        if let Some(rest) = strip_keyword(action, &upper, &["MODIFY"]) {
            let spec = strip_column_keyword(rest);
            let column = parse_column_spec(spec, 0)?;
            return Ok(StatementKind::Ddl(Some(DdlOp::ModifyColumn { id, column })));
        }

        // RENAME TO, CONVERT TO, ENGINE= 등: 컬럼 구조 불변
        Ok(StatementKind::Ddl(None))
    }

    fn apply_op(&mut self, op: DdlOp) {
        match op {
            DdlOp::CreateTable { id, columns } => {
                debug!("Applying CREATE TABLE for {}", id);
                let mut def = TableDef {
                    id: id.clone(),
                    columns,
                };
                def.renumber();
                self.snapshot.tables.insert(id, def);
            }
            DdlOp::AddColumn { id, column } => {
                debug!("Applying ADD COLUMN {} to {}", column.name, id);
                // 히스토리가 스트림 중간부터 시작할 수 있음: 미지의 테이블이면 생성
                let def = self.snapshot.tables.entry(id.clone()).or_insert(TableDef {
                    id,
                    columns: Vec::new(),
                });
                def.columns.retain(|c| c.name != column.name);
                def.columns.push(column);
                def.renumber();
            }
            DdlOp::DropColumn { id, name } => {
                if let Some(def) = self.snapshot.tables.get_mut(&id) {
                    def.columns.retain(|c| c.name != name);
                    def.renumber();
                }
            }
            DdlOp::ModifyColumn { id, column } => {
                if let Some(def) = self.snapshot.tables.get_mut(&id) {
                    match def.columns.iter_mut().find(|c| c.name == column.name) {
                        Some(existing) => {
                            existing.col_type = column.col_type;
                            existing.nullable = column.nullable;
                            existing.default = column.default;
                        }
                        None => {
                            def.columns.push(column);
                            def.renumber();
                        }
                    }
                }
            }
            DdlOp::DropTable { id } => {
                debug!("Applying DROP TABLE for {}", id);
                self.snapshot.tables.remove(&id);
            }
        }
    }
}

/// ';' 기준 문장 분리 (작은따옴표 문자열 내부는 무시)
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/// "db.table" 또는 "table" 식별자 해석 (백틱 제거)
fn parse_table_ident(default_database: &str, ident: &str) -> TableId {
    let cleaned = ident.replace('`', "");
    match cleaned.split_once('.') {
        Some((db, table)) => TableId::new(db, table),
        None => TableId::new(default_database, cleaned),
    }
}

fn unquote(ident: &str) -> String {
    ident.trim_matches('`').to_string()
}

/// 접두 키워드 제거 ("ADD ..." -> "...")
fn strip_keyword<'a>(text: &'a str, upper: &str, keywords: &[&str]) -> Option<&'a str> {
    for kw in keywords {
        if upper.starts_with(kw) {
            let rest = &text[kw.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Some(rest.trim_start());
            }
        }
    }
    None
}

fn strip_column_keyword(text: &str) -> &str {
    let upper = text.trim_start().to_uppercase();
    if upper.starts_with("COLUMN") {
        text.trim_start()[6..].trim_start()
    } else {
        text.trim_start()
    }
}

/// CREATE TABLE 본문을 괄호 깊이를 고려해 최상위 ','로 분리
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    for ch in body.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            '(' if !in_string => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_string => {
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_string && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_column_list(body: &str) -> Result<Vec<ColumnDef>> {
    const NON_COLUMN: [&str; 9] = [
        "PRIMARY",
        "KEY",
        "UNIQUE",
        "INDEX",
        "CONSTRAINT",
        "FOREIGN",
        "FULLTEXT",
        "SPATIAL",
        "CHECK",
    ];
    let mut columns = Vec::new();
    for (i, entry) in split_top_level(body).into_iter().enumerate() {
        let first = entry
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_uppercase();
        if NON_COLUMN.contains(&first.as_str()) {
            continue;
        }
        columns.push(parse_column_spec(&entry, i as u32)?);
    }
    Ok(columns)
}

/// "name TYPE [NOT NULL] [DEFAULT x] ..." 해석
fn parse_column_spec(spec: &str, ordinal: u32) -> Result<ColumnDef> {
    let spec = spec.trim();
    let mut tokens = spec.split_whitespace();
    let name = unquote(tokens.next().unwrap_or(""));
    let base_type = tokens.next().unwrap_or("").to_string();
    if name.is_empty() || base_type.is_empty() {
        return Err(CdcError::SchemaParseError(format!(
            "Invalid column definition: {}",
            spec
        )));
    }
    // VARCHAR (100) 처럼 타입과 괄호가 띄어진 경우 흡수
    let mut col_type = base_type;
    let rest: Vec<&str> = tokens.collect();
    let mut idx = 0;
    if !col_type.contains('(') && rest.first().is_some_and(|t| t.starts_with('(')) {
        col_type.push_str(rest[0]);
        idx = 1;
    }

    let mut nullable = true;
    let mut default = None;
    while idx < rest.len() {
        let upper = rest[idx].to_uppercase();
        match upper.as_str() {
            "NOT" if rest.get(idx + 1).is_some_and(|t| t.eq_ignore_ascii_case("null")) => {
                nullable = false;
                idx += 2;
            }
            "DEFAULT" => {
                default = rest.get(idx + 1).map(|t| t.trim_matches('\'').to_string());
                idx += 2;
            }
            _ => idx += 1,
        }
    }

    Ok(ColumnDef {
        name,
        col_type: col_type.to_uppercase(),
        nullable,
        ordinal,
        default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SchemaTracker {
        SchemaTracker::new()
    }

    #[test]
    fn test_create_table() {
        let mut t = tracker();
        let applied = t
            .apply_ddl(
                "shop",
                "CREATE TABLE orders (id INT NOT NULL, note VARCHAR(100) DEFAULT 'none', PRIMARY KEY (id))",
            )
            .unwrap();
        assert_eq!(applied.len(), 1);

        let def = t.snapshot().table(&TableId::new("shop", "orders")).unwrap();
        assert_eq!(def.columns.len(), 2);
        assert_eq!(def.columns[0].name, "id");
        assert!(!def.columns[0].nullable);
        assert_eq!(def.columns[1].col_type, "VARCHAR(100)");
        assert_eq!(def.columns[1].default.as_deref(), Some("none"));
        assert_eq!(def.columns[1].ordinal, 1);
    }

    #[test]
    fn test_alter_add_column_creates_missing_table() {
        let mut t = tracker();
        let applied = t.apply_ddl("d", "ALTER TABLE t ADD c INT").unwrap();
        assert_eq!(applied, vec!["ALTER TABLE t ADD c INT"]);

        let def = t.snapshot().table(&TableId::new("d", "t")).unwrap();
        assert_eq!(def.columns.len(), 1);
        assert_eq!(def.columns[0].name, "c");
        assert_eq!(def.columns[0].col_type, "INT");
    }

    #[test]
    fn test_alter_drop_and_modify() {
        let mut t = tracker();
        t.apply_ddl("d", "CREATE TABLE t (a INT, b INT, c VARCHAR(10))")
            .unwrap();
        t.apply_ddl("d", "ALTER TABLE t DROP COLUMN b").unwrap();
        t.apply_ddl("d", "ALTER TABLE t MODIFY c TEXT NOT NULL")
            .unwrap();

        let def = t.snapshot().table(&TableId::new("d", "t")).unwrap();
        assert_eq!(def.column_names(), vec!["a", "c"]);
        assert_eq!(def.columns[1].ordinal, 1);
        assert_eq!(def.column("c").unwrap().col_type, "TEXT");
        assert!(!def.column("c").unwrap().nullable);
    }

    #[test]
    fn test_drop_table() {
        let mut t = tracker();
        t.apply_ddl("d", "CREATE TABLE t (a INT)").unwrap();
        t.apply_ddl("d", "DROP TABLE IF EXISTS d.t").unwrap();
        assert!(t.snapshot().table(&TableId::new("d", "t")).is_none());
    }

    #[test]
    fn test_non_ddl_yields_no_statements() {
        let mut t = tracker();
        assert!(t.apply_ddl("d", "BEGIN").unwrap().is_empty());
        assert!(t
            .apply_ddl("d", "INSERT INTO t VALUES (1)")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_index_ddl_has_no_column_effect() {
        let mut t = tracker();
        t.apply_ddl("d", "CREATE TABLE t (a INT)").unwrap();
        let applied = t
            .apply_ddl("d", "ALTER TABLE t ADD INDEX idx_a (a)")
            .unwrap();
        assert_eq!(applied.len(), 1);
        let def = t.snapshot().table(&TableId::new("d", "t")).unwrap();
        assert_eq!(def.columns.len(), 1);
    }

    #[test]
    fn test_parse_failure_is_atomic() {
        let mut t = tracker();
        t.apply_ddl("d", "CREATE TABLE t (a INT)").unwrap();

        // 두 번째 문장이 깨져 있으면 첫 문장의 효과도 적용되지 않음
        let result = t.apply_ddl("d", "ALTER TABLE t ADD b INT; ALTER TABLE t DROP");
        assert!(matches!(result, Err(CdcError::SchemaParseError(_))));

        let def = t.snapshot().table(&TableId::new("d", "t")).unwrap();
        assert_eq!(def.column_names(), vec!["a"]);
    }

    #[test]
    fn test_qualified_table_name() {
        let mut t = tracker();
        t.apply_ddl("ignored", "CREATE TABLE `other`.`t` (`a` INT)")
            .unwrap();
        assert!(t.snapshot().table(&TableId::new("other", "t")).is_some());
    }

    #[test]
    fn test_statements_inside_string_literal() {
        let stmts = split_statements("UPDATE t SET v = 'a;b'; COMMIT");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "UPDATE t SET v = 'a;b'");
    }
}
