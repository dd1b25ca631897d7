//! 테이블 프로비저닝 — 직렬화된 DFA 테이블을 커널 저장소에 기록
//!
//! [`provision()`]은 [`SerializedTable`]의 모든 엔트리를 [`TableStore`]에 upsert 합니다.
//! 저장소 구현:
//! - [`PinnedMap`](crate::bpf::PinnedMap): bpffs에 고정된 per-CPU 해시 맵 (Linux 전용)
//! - [`MemoryStore`]: 메모리 내 저장소 (dry-run, 테스트)
//!
//! 재시도는 없습니다. 실패 처리는 [`ProvisionPolicy`]로 결정합니다.

use std::collections::HashMap;

use tracing::{info, trace, warn};

use xids_core::config::ProvisionPolicy;
use xids_core::error::{ProvisionError, StoreError};
use xids_core::metrics as m;
use xids_dfa::SerializedTable;
use xids_ebpf_common::DfaKey;

/// 고정 크기 키/값 저장소
pub trait TableStore {
    /// `key`에 `value`를 기록합니다 (없으면 삽입, 있으면 덮어쓰기).
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
}

/// 실패한 엔트리 하나
#[derive(Debug)]
pub struct EntryFailure {
    /// 실패한 키
    pub key: DfaKey,
    /// 저장소 에러
    pub error: StoreError,
}

/// 프로비저닝 결과
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// 기록을 시도한 엔트리 수
    pub attempted: usize,
    /// 성공한 엔트리 수
    pub written: usize,
    /// 실패한 엔트리 목록 ([`ProvisionPolicy::Continue`]에서만 채워짐)
    pub failures: Vec<EntryFailure>,
}

impl ProvisionReport {
    /// 실패가 없으면 `Ok(self)`, 있으면 `ProvisionError::Partial`을 반환합니다.
    pub fn into_result(self) -> Result<Self, ProvisionError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(ProvisionError::Partial {
                failed: self.failures.len(),
                total: self.attempted,
            })
        }
    }
}

/// 직렬화된 테이블을 저장소에 기록합니다.
///
/// 엔트리는 상태 우선, 바이트 오름차순으로 기록됩니다.
///
/// # 에러
/// - [`ProvisionPolicy::StopOnFirstError`]: 첫 실패에서 `ProvisionError::Update` 반환
/// - [`ProvisionPolicy::Continue`]: 항상 `Ok`, 실패는 [`ProvisionReport::failures`]에 기록
pub fn provision<S: TableStore + ?Sized>(
    store: &mut S,
    table: &SerializedTable,
    policy: ProvisionPolicy,
) -> Result<ProvisionReport, ProvisionError> {
    let mut report = ProvisionReport::default();

    for (raw_key, value) in table.iter() {
        report.attempted += 1;
        let key = key_of(raw_key);

        match store.upsert(raw_key, value) {
            Ok(()) => {
                report.written += 1;
                trace!(state = key.state, unit = key.unit, "table entry written");
            }
            Err(error) => {
                metrics::counter!(m::TABLE_ENTRIES_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                match policy {
                    ProvisionPolicy::StopOnFirstError => {
                        metrics::counter!(m::TABLE_ENTRIES_TOTAL, m::LABEL_RESULT => "success")
                            .increment(report.written as u64);
                        warn!(
                            state = key.state,
                            unit = key.unit,
                            written = report.written,
                            error = %error,
                            "table provisioning aborted"
                        );
                        return Err(ProvisionError::Update {
                            state: key.state,
                            unit: key.unit,
                            source: error,
                        });
                    }
                    ProvisionPolicy::Continue => {
                        warn!(state = key.state, unit = key.unit, error = %error, "table entry failed");
                        report.failures.push(EntryFailure { key, error });
                    }
                }
            }
        }
    }

    metrics::counter!(m::TABLE_ENTRIES_TOTAL, m::LABEL_RESULT => "success")
        .increment(report.written as u64);
    info!(
        entries = report.attempted,
        written = report.written,
        failed = report.failures.len(),
        value_len = table.value_len(),
        "dfa table provisioned"
    );
    Ok(report)
}

fn key_of(raw: &[u8]) -> DfaKey {
    let mut bytes = [0u8; DfaKey::SIZE];
    let n = raw.len().min(DfaKey::SIZE);
    bytes[..n].copy_from_slice(&raw[..n]);
    DfaKey::from_bytes(&bytes)
}

/// 메모리 내 테이블 저장소
///
/// dry-run 모드와 테스트에서 사용합니다. 용량을 지정하면 가득 찬 저장소를 흉내냅니다.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<Vec<u8>, Vec<u8>>,
    capacity: Option<usize>,
    value_len: Option<usize>,
}

impl MemoryStore {
    /// 용량 제한 없는 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 최대 `capacity`개의 키를 담는 저장소를 생성합니다.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// 값 크기를 고정합니다. 다른 크기의 값은 `StoreError::SizeMismatch`로 거부됩니다.
    pub fn with_value_len(mut self, len: usize) -> Self {
        self.value_len = Some(len);
        self
    }

    /// 저장된 키 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 키로 값을 조회합니다.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

impl TableStore for MemoryStore {
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if let Some(expected) = self.value_len
            && expected != value.len()
        {
            return Err(StoreError::SizeMismatch {
                expected,
                actual: value.len(),
            });
        }
        if let Some(existing) = self.entries.get_mut(key) {
            existing.clear();
            existing.extend_from_slice(value);
            return Ok(());
        }
        if self.capacity.is_some_and(|cap| self.entries.len() >= cap) {
            return Err(StoreError::Full);
        }
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
