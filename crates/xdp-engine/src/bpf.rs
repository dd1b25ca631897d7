//! bpffs에 고정된 커널 맵 접근 (Linux 전용)
//!
//! 맵 핸들은 aya의 [`MapData::from_pin`]으로 얻고, 타입과 크기는 [`MapData::info`]로
//! 확인한 뒤 aya의 타입 맵(`PerCpuHashMap`, `HashMap`, `XskMap`)으로 감쌉니다.
//!
//! # 맵 경로
//! ```text
//! {pin_base_dir}/{device}/ids_inspect_map   DFA 전이 테이블 (PERCPU_HASH)
//! {pin_base_dir}/{device}/xsks_map          AF_XDP 소켓 맵 (XSKMAP, 읽기 전용)
//! ```

use std::io;
use std::path::Path;

use aya::maps::{HashMap, Map, MapData, MapError, MapType, PerCpuHashMap, PerCpuValues, XskMap};
use tracing::{debug, info};

use xids_core::error::{DatapathError, ProvisionError, StoreError};
use xids_dfa::{possible_cpus, value_stride};
use xids_ebpf_common::{DfaKey, DfaValue};

use crate::provision::TableStore;

/// 없으면 생성, 있으면 덮어쓰기
const BPF_ANY: u64 = 0;

/// 테이블 맵의 값 구성
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    /// CPU마다 값 슬롯 하나
    PerCpu,
    /// 값 하나
    Flat,
}

/// DFA 테이블로 쓸 수 있는 맵 타입인지 판별합니다.
///
/// 키가 `(상태, 바이트)`이므로 해시 계열만 허용합니다.
fn table_kind(map_type: MapType) -> Option<TableKind> {
    match map_type {
        MapType::PerCpuHash | MapType::LruPerCpuHash => Some(TableKind::PerCpu),
        MapType::Hash | MapType::LruHash => Some(TableKind::Flat),
        _ => None,
    }
}

/// 엔트리 하나의 값 버퍼 크기 (바이트)
fn value_len(kind: TableKind, value_size: usize, n_cpus: usize) -> usize {
    match kind {
        TableKind::PerCpu => value_stride(value_size) * n_cpus,
        TableKind::Flat => value_size,
    }
}

/// 직렬화된 per-CPU 값 버퍼를 CPU별 값으로 나눕니다.
fn split_per_cpu(value: &[u8], n_cpus: usize) -> Vec<DfaValue> {
    let stride = value_stride(DfaValue::SIZE);
    value
        .chunks_exact(stride)
        .take(n_cpus)
        .map(DfaValue::read_from)
        .collect()
}

fn store_error(e: MapError) -> StoreError {
    match e {
        MapError::SyscallError(err) if err.io_error.raw_os_error() == Some(libc::E2BIG) => {
            StoreError::Full
        }
        MapError::SyscallError(err) => StoreError::Io(err.io_error),
        other => StoreError::Io(io::Error::other(other)),
    }
}

enum TableHandle {
    PerCpu(PerCpuHashMap<MapData, DfaKey, DfaValue>),
    Flat(HashMap<MapData, DfaKey, DfaValue>),
}

/// 고정된 DFA 전이 테이블 맵
///
/// per-CPU 맵이면 값 버퍼 크기는 `value_stride(value_size) × 가능한 CPU 수`입니다.
pub struct PinnedMap {
    handle: TableHandle,
    n_cpus: usize,
    value_len: usize,
}

impl PinnedMap {
    /// 고정 경로에서 맵을 엽니다.
    ///
    /// # 에러
    /// - `ProvisionError::MapOpen`: 경로가 없거나, 해시 맵이 아니거나, 키/값 크기가 다른 경우
    /// - `ProvisionError::CpuTopology`: per-CPU 맵인데 CPU 수를 알 수 없는 경우
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProvisionError> {
        let path = path.as_ref();
        let open_err = |reason: String| ProvisionError::MapOpen {
            path: path.display().to_string(),
            reason,
        };

        let data = MapData::from_pin(path).map_err(|e| open_err(e.to_string()))?;
        let info = data.info().map_err(|e| open_err(e.to_string()))?;
        let map_type = info.map_type().map_err(|e| open_err(e.to_string()))?;
        let kind = table_kind(map_type)
            .ok_or_else(|| open_err(format!("unsupported map type {map_type:?}")))?;

        let (key_size, value_size) = (info.key_size() as usize, info.value_size() as usize);
        if key_size != DfaKey::SIZE || value_size != DfaValue::SIZE {
            return Err(open_err(format!(
                "expected key/value size {}/{}, found {key_size}/{value_size}",
                DfaKey::SIZE,
                DfaValue::SIZE
            )));
        }

        let n_cpus = match kind {
            TableKind::PerCpu => possible_cpus()?,
            TableKind::Flat => 1,
        };

        let handle = match (kind, map_type) {
            (TableKind::PerCpu, MapType::LruPerCpuHash) => {
                PerCpuHashMap::try_from(Map::PerCpuLruHashMap(data)).map(TableHandle::PerCpu)
            }
            (TableKind::PerCpu, _) => {
                PerCpuHashMap::try_from(Map::PerCpuHashMap(data)).map(TableHandle::PerCpu)
            }
            (TableKind::Flat, MapType::LruHash) => {
                HashMap::try_from(Map::LruHashMap(data)).map(TableHandle::Flat)
            }
            (TableKind::Flat, _) => HashMap::try_from(Map::HashMap(data)).map(TableHandle::Flat),
        }
        .map_err(|e| open_err(e.to_string()))?;

        info!(
            path = %path.display(),
            map_id = info.id(),
            map_type = ?map_type,
            max_entries = info.max_entries(),
            n_cpus,
            "pinned table map opened"
        );

        Ok(Self {
            handle,
            n_cpus,
            value_len: value_len(kind, value_size, n_cpus),
        })
    }

    /// 엔트리 하나의 값 버퍼 크기 (바이트)
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// per-CPU 맵 여부
    pub fn is_per_cpu(&self) -> bool {
        matches!(self.handle, TableHandle::PerCpu(_))
    }
}

impl TableStore for PinnedMap {
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let key: &[u8; DfaKey::SIZE] = key.try_into().map_err(|_| StoreError::SizeMismatch {
            expected: DfaKey::SIZE,
            actual: key.len(),
        })?;
        if value.len() != self.value_len {
            return Err(StoreError::SizeMismatch {
                expected: self.value_len,
                actual: value.len(),
            });
        }

        let key = DfaKey::from_bytes(key);
        match &mut self.handle {
            TableHandle::PerCpu(map) => {
                let values = PerCpuValues::try_from(split_per_cpu(value, self.n_cpus))?;
                map.insert(key, values, BPF_ANY)
            }
            TableHandle::Flat(map) => map.insert(key, DfaValue::read_from(value), BPF_ANY),
        }
        .map_err(store_error)
    }
}

/// 고정된 AF_XDP 소켓 맵 (읽기 전용)
///
/// 큐 번호 → 소켓 등록은 XDP 프로그램을 붙이는 쪽의 책임이며, 여기서는 존재와 타입만 확인합니다.
pub struct SocketMap {
    _map: XskMap<MapData>,
    max_entries: u32,
}

impl SocketMap {
    /// 고정 경로에서 소켓 맵을 엽니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatapathError> {
        let path = path.as_ref();
        let setup = |reason: String| DatapathError::Setup {
            stage: "socket map",
            reason: format!("{}: {reason}", path.display()),
        };

        let data = MapData::from_pin(path).map_err(|e| setup(e.to_string()))?;
        let info = data.info().map_err(|e| setup(e.to_string()))?;
        let map_type = info.map_type().map_err(|e| setup(e.to_string()))?;
        if !matches!(map_type, MapType::XskMap) {
            return Err(setup(format!("expected XSKMAP, found {map_type:?}")));
        }
        let max_entries = info.max_entries();
        let map = XskMap::try_from(Map::XskMap(data)).map_err(|e| setup(e.to_string()))?;

        debug!(path = %path.display(), max_entries, "socket map opened");
        Ok(Self {
            _map: map,
            max_entries,
        })
    }

    /// 큐 번호가 맵 범위 안에 있는지 확인합니다.
    pub fn covers_queue(&self, queue: u32) -> bool {
        queue < self.max_entries
    }
}
