//! DFA 테이블 직렬화 및 per-CPU 복제
//!
//! [`Dfa`]의 전이를 커널 맵 엔트리 `(DfaKey, 값 버퍼)`로 변환합니다.
//!
//! per-CPU 해시 맵에 쓰는 값 버퍼는 가능한 CPU마다 하나의 슬롯을 가지며,
//! 각 슬롯은 [`VALUE_STRIDE`] 경계로 정렬되고 모든 슬롯의 내용은 동일합니다.
//! 이 복제 규칙은 [`PerCpuSerializer`]에만 존재하며, 단일 값 저장소는
//! [`FlatSerializer`]를 사용합니다.

use std::path::Path;

use tracing::debug;

use xids_core::config::TableLayout;
use xids_core::error::ProvisionError;
use xids_ebpf_common::{DfaKey, DfaValue, VALUE_STRIDE};

use crate::automaton::Dfa;

/// 가능한 CPU 목록 sysfs 경로
const POSSIBLE_CPUS_PATH: &str = "/sys/devices/system/cpu/possible";

/// `size`를 per-CPU 슬롯 정렬 단위로 올림합니다.
pub const fn value_stride(size: usize) -> usize {
    size.next_multiple_of(VALUE_STRIDE)
}

/// DFA를 커널 테이블 엔트리로 직렬화하는 방식
///
/// 저장소의 값 형식(단일 값 / CPU별 복제)을 이 트레이트 뒤에 숨깁니다.
pub trait TableSerializer {
    /// 엔트리 하나의 값 버퍼 크기 (바이트)
    fn value_size(&self) -> usize;

    /// 전이 테이블 레이아웃
    fn layout(&self) -> TableLayout {
        TableLayout::Dense
    }

    /// `value`를 `out`(길이 = [`value_size()`](Self::value_size))에 기록합니다.
    fn encode_value(&self, value: &DfaValue, out: &mut [u8]);

    /// 전체 전이를 상태 우선, 바이트 오름차순으로 직렬화합니다.
    fn serialize(&self, dfa: &Dfa) -> SerializedTable {
        let value_len = self.value_size();
        let layout = self.layout();

        let mut table = SerializedTable {
            keys: Vec::with_capacity(dfa.state_count() * 256),
            values: Vec::with_capacity(dfa.state_count() * 256 * value_len),
            value_len,
        };

        for t in dfa.transitions() {
            if layout == TableLayout::ElideRoot && t.to == Dfa::START && !t.accepting {
                continue;
            }
            table.keys.push(DfaKey::new(t.from, t.byte).to_bytes());
            let start = table.values.len();
            table.values.resize(start + value_len, 0);
            self.encode_value(&DfaValue::new(t.to, t.accepting), &mut table.values[start..]);
        }

        debug!(
            entries = table.len(),
            value_len,
            layout = ?layout,
            "dfa table serialized"
        );
        table
    }
}

/// per-CPU 해시 맵용 직렬화 (CPU마다 동일한 슬롯 복제)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerCpuSerializer {
    n_cpus: usize,
    stride: usize,
    layout: TableLayout,
}

impl PerCpuSerializer {
    /// `n_cpus`개의 슬롯을 갖는 직렬화기를 생성합니다.
    ///
    /// 슬롯 간격은 `DfaValue` 크기를 8바이트로 올림한 값입니다.
    /// `n_cpus`가 0이면 1로 취급합니다.
    pub fn new(n_cpus: usize) -> Self {
        Self::with_stride(n_cpus, value_stride(DfaValue::SIZE))
    }

    /// 슬롯 간격을 직접 지정합니다. `stride`는 `DfaValue` 크기 이상으로 올림됩니다.
    pub fn with_stride(n_cpus: usize, stride: usize) -> Self {
        Self {
            n_cpus: n_cpus.max(1),
            stride: value_stride(stride.max(DfaValue::SIZE)),
            layout: TableLayout::Dense,
        }
    }

    /// 전이 테이블 레이아웃을 지정합니다.
    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    /// 가능한 CPU 수를 조회하여 직렬화기를 생성합니다.
    pub fn for_possible_cpus() -> Result<Self, ProvisionError> {
        Ok(Self::new(possible_cpus()?))
    }

    /// 슬롯(CPU) 수
    pub fn n_cpus(&self) -> usize {
        self.n_cpus
    }

    /// 슬롯 간격 (바이트)
    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl TableSerializer for PerCpuSerializer {
    fn value_size(&self) -> usize {
        self.n_cpus * self.stride
    }

    fn layout(&self) -> TableLayout {
        self.layout
    }

    fn encode_value(&self, value: &DfaValue, out: &mut [u8]) {
        for slot in out.chunks_exact_mut(self.stride) {
            value.write_to(slot);
        }
    }
}

/// 단일 값 저장소용 직렬화 (복제 없음)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlatSerializer {
    layout: TableLayout,
}

impl FlatSerializer {
    /// 전이 테이블 레이아웃을 지정합니다.
    pub fn with_layout(layout: TableLayout) -> Self {
        Self { layout }
    }
}

impl TableSerializer for FlatSerializer {
    fn value_size(&self) -> usize {
        DfaValue::SIZE
    }

    fn layout(&self) -> TableLayout {
        self.layout
    }

    fn encode_value(&self, value: &DfaValue, out: &mut [u8]) {
        value.write_to(out);
    }
}

/// 직렬화된 테이블 (키와 값 버퍼를 연속 메모리에 보관)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedTable {
    keys: Vec<[u8; DfaKey::SIZE]>,
    values: Vec<u8>,
    value_len: usize,
}

impl SerializedTable {
    /// 엔트리 수
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// 엔트리가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 엔트리 하나의 값 버퍼 크기 (바이트)
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// 원시 `(키 바이트, 값 버퍼)` 쌍을 순회합니다.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&[u8], &[u8])> {
        self.keys
            .iter()
            .map(|k| k.as_slice())
            .zip(self.values.chunks_exact(self.value_len))
    }

    /// 논리적 `(DfaKey, DfaValue)` 쌍을 순회합니다 (첫 번째 슬롯 기준).
    pub fn entries(&self) -> impl ExactSizeIterator<Item = (DfaKey, DfaValue)> + '_ {
        self.keys
            .iter()
            .zip(self.values.chunks_exact(self.value_len))
            .map(|(k, v)| (DfaKey::from_bytes(k), DfaValue::read_from(v)))
    }
}

/// 가능한 CPU 수를 조회합니다 (`/sys/devices/system/cpu/possible`).
pub fn possible_cpus() -> Result<usize, ProvisionError> {
    possible_cpus_from(POSSIBLE_CPUS_PATH)
}

/// 지정한 CPU 목록 파일에서 가능한 CPU 수를 읽습니다.
pub fn possible_cpus_from(path: impl AsRef<Path>) -> Result<usize, ProvisionError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| ProvisionError::CpuTopology {
        reason: format!("{}: {e}", path.display()),
    })?;
    parse_cpu_list(&raw)
}

/// `"0-3,5"` 형식의 CPU 목록을 파싱하여 CPU 수를 반환합니다.
pub fn parse_cpu_list(list: &str) -> Result<usize, ProvisionError> {
    let invalid = |reason: String| ProvisionError::CpuTopology { reason };
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| invalid(format!("invalid cpu id '{s}': {e}")))
    };

    let mut count = 0usize;
    for range in list.trim().split(',').filter(|r| !r.trim().is_empty()) {
        match range.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse(lo)?, parse(hi)?);
                if hi < lo {
                    return Err(invalid(format!("descending cpu range '{range}'")));
                }
                count += hi - lo + 1;
            }
            None => {
                parse(range)?;
                count += 1;
            }
        }
    }

    if count == 0 {
        return Err(invalid(format!("empty cpu list '{}'", list.trim())));
    }
    Ok(count)
}
