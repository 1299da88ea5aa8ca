//! 스키마 히스토리 저장소
//!
//! 적용된 DDL을 추가 전용(append-only) 로그로 영속화합니다. 재시작 시 순서대로
//! 재생하면 스냅샷을 복원할 수 있습니다. 행 이벤트보다 먼저 디스크에 도달해야
//! 하므로 기록은 fsync 후에만 성공으로 간주합니다.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 히스토리 엔트리: 오프셋 + 데이터베이스 + 적용된 문장들
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// DDL이 관측된 시점의 오프셋 맵
    pub source: serde_json::Value,
    pub database: String,
    pub statements: Vec<String>,
}

/// 스키마 히스토리 저장소 인터페이스
///
/// 수신 컨텍스트에서만 기록합니다. 폴러는 접근하지 않습니다.
pub trait SchemaHistory: Send {
    /// 엔트리 기록. 반환 시점에 내구성이 보장되어야 함
    fn record(&mut self, entry: &HistoryRecord) -> Result<()>;

    /// 저장된 엔트리를 기록 순서대로 반환
    fn recover(&mut self) -> Result<Vec<HistoryRecord>>;
}

/// 파일 기반 히스토리 (JSON Lines)
pub struct FileSchemaHistory {
    path: PathBuf,
    file: Option<File>,
}

impl FileSchemaHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSchemaHistory {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| CdcError::HistoryError("history file not open".to_string()))
    }
}

impl SchemaHistory for FileSchemaHistory {
    fn record(&mut self, entry: &HistoryRecord) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let file = self.open_append()?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        // 내구성 보장: 이후의 행 이벤트가 이 DDL에 의존함
        file.sync_data()?;
        debug!("Recorded {} DDL statement(s) for database '{}'", entry.statements.len(), entry.database);
        Ok(())
    }

    fn recover(&mut self) -> Result<Vec<HistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: HistoryRecord = serde_json::from_str(&line).map_err(|e| {
                CdcError::HistoryError(format!(
                    "{}:{} 손상된 히스토리 라인: {}",
                    self.path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            entries.push(entry);
        }
        info!(
            "Recovered {} schema history entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries)
    }
}

/// 메모리 히스토리 (테스트 및 휘발성 실행용)
#[derive(Default)]
pub struct MemorySchemaHistory {
    entries: Vec<HistoryRecord>,
}

impl MemorySchemaHistory {
    pub fn new() -> Self {
        MemorySchemaHistory::default()
    }

    pub fn entries(&self) -> &[HistoryRecord] {
        &self.entries
    }
}

impl SchemaHistory for MemorySchemaHistory {
    fn record(&mut self, entry: &HistoryRecord) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn recover(&mut self) -> Result<Vec<HistoryRecord>> {
        Ok(self.entries.clone())
    }
}
