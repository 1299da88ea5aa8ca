//! 디스패처와 폴러 사이의 유한 큐
//!
//! 생산자(수신 컨텍스트)는 큐가 가득 차면 enqueue에서 대기하고 (backpressure),
//! 소비자(폴러)는 비어 있으면 설정된 시간만큼 대기합니다. close() 후에도
//! 이미 들어간 레코드는 전부 꺼낼 수 있습니다.

use crate::error::{CdcError, Result};
use crate::record::ChangeRecord;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// 유한 큐 생성. (생산자 핸들, 소비자 큐) 쌍 반환
pub fn change_event_queue(capacity: usize) -> (RecordSender, ChangeEventQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordSender { tx },
        ChangeEventQueue {
            rx: Mutex::new(rx),
        },
    )
}

/// 생산자 핸들
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<ChangeRecord>,
}

impl RecordSender {
    /// 레코드 추가. 큐가 가득 차면 자리가 날 때까지 대기
    ///
    /// 큐가 닫힌 경우 `Interrupted`를 반환합니다. 수신 루프는 이를 정상적인
    /// 종료 신호로 취급합니다 (에러로 전파하지 않음).
    pub async fn enqueue(&self, record: ChangeRecord) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| CdcError::Interrupted)
    }
}

/// 소비자 측 큐
pub struct ChangeEventQueue {
    rx: Mutex<mpsc::Receiver<ChangeRecord>>,
}

impl ChangeEventQueue {
    /// 레코드 하나를 대기하며 꺼냄. 닫힌 뒤 비면 None (스트림 끝)
    pub async fn poll(&self) -> Option<ChangeRecord> {
        self.rx.lock().await.recv().await
    }

    /// 최대 `max`개를 모아서 반환
    ///
    /// 첫 레코드는 `wait`까지 기다리고, 그 뒤로는 대기 없이 남은 것만 긁어옵니다.
    /// 타임아웃이거나 스트림이 끝나면 빈 벡터를 반환합니다.
    pub async fn drain_batch(&self, max: usize, wait: Duration) -> Vec<ChangeRecord> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        if max == 0 {
            return batch;
        }

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(record)) => batch.push(record),
            Ok(None) | Err(_) => return batch,
        }

        while batch.len() < max {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        batch
    }

    /// 큐 닫기: 생산자의 대기를 즉시 풀어주고, 남은 레코드는 계속 꺼낼 수 있음
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}
