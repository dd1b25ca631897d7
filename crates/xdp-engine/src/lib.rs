#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`provision`]: [`SerializedTable`](xids_dfa::SerializedTable) → 테이블 저장소 ([`TableStore`])
//! - [`umem`]: 프레임 아레나와 프레임 소유권 상태 머신
//! - [`ring`]: AF_XDP 단일 생산자/소비자 링
//! - [`parse`]: 제한된 헤더 파싱
//! - [`datapath`]: 수신 → 검사 → 전달 루프
//! - [`stats`]: 데이터패스 카운터와 주기 샘플러
//! - [`loopback`]: 커널 없이 데이터패스를 구동하는 피어
//! - `bpf`, `xsk` (Linux): 고정 맵 접근과 AF_XDP 소켓
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 타입은 [`xids_ebpf_common`] 크레이트에 정의되어 있습니다.

pub mod datapath;
pub mod loopback;
pub mod parse;
pub mod provision;
pub mod ring;
pub mod stats;
pub mod umem;

#[cfg(target_os = "linux")]
pub mod bpf;
#[cfg(target_os = "linux")]
pub mod xsk;

// --- 주요 타입 re-export ---

// 프로비저닝
pub use provision::{EntryFailure, MemoryStore, ProvisionReport, TableStore, provision};

// 데이터패스
pub use datapath::{
    BatchOutcome, Datapath, DatapathBuilder, DatapathOptions, DatapathRings, MacRewrite, XskIo,
};
pub use parse::{Inspection, L3, L4, PassReason, inspect};
pub use ring::XdpDesc;
pub use umem::{FrameCounts, FrameId, FrameState, Umem};

// 통계
pub use stats::{DatapathCounters, DatapathSnapshot, DatapathStats, DirectionMetrics, StatsSampler};

// Linux
#[cfg(target_os = "linux")]
pub use bpf::{PinnedMap, SocketMap};
#[cfg(target_os = "linux")]
pub use xsk::{XskSocket, interface_index};

// 공유 타입 (커널/유저스페이스 공통)
pub use xids_ebpf_common;
