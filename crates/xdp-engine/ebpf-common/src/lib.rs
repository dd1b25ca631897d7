//! eBPF 커널/유저스페이스 공유 타입
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능한 공통 타입을 정의합니다.
//! 커널 매칭 프로그램과 유저스페이스 프로비저너가 동일한 메모리 레이아웃(`#[repr(C)]`)을
//! 사용하도록 보장합니다.
//!
//! # 맵 구성
//! - **PerCpuHashMap** (`ids_inspect_map`): DFA 전이 테이블 — `(상태, 바이트)` → `(다음 상태, 수락 플래그)`
//! - **XskMap** (`xsks_map`): 수신 큐 번호 → AF_XDP 소켓

#![no_std]

// =============================================================================
// 맵 이름 상수
// =============================================================================

/// DFA 전이 테이블 맵 이름
pub const MAP_IDS_INSPECT: &str = "ids_inspect_map";
/// AF_XDP 소켓 맵 이름
pub const MAP_XSKS: &str = "xsks_map";

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// IPv4 EtherType
pub const ETH_P_IP: u16 = 0x0800;
/// IPv6 EtherType
pub const ETH_P_IPV6: u16 = 0x86DD;
/// TCP 프로토콜 번호
pub const IPPROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const IPPROTO_UDP: u8 = 17;

/// 이더넷 헤더 길이
pub const ETH_HLEN: usize = 14;
/// IPv4 최소 헤더 길이 (IHL = 5)
pub const IPV4_MIN_HLEN: usize = 20;
/// IPv6 고정 헤더 길이
pub const IPV6_HLEN: usize = 40;
/// TCP 최소 헤더 길이 (data offset = 5)
pub const TCP_MIN_HLEN: usize = 20;
/// UDP 헤더 길이
pub const UDP_HLEN: usize = 8;

// =============================================================================
// DFA 테이블 레이아웃
// =============================================================================

/// per-CPU 맵 값 슬롯의 정렬 단위 (바이트)
///
/// 커널은 per-CPU 맵 값을 CPU마다 8바이트 경계로 복사합니다.
/// 유저스페이스 버퍼의 슬롯 간격도 이 값에 맞춰야 합니다.
pub const VALUE_STRIDE: usize = 8;

/// 수락 상태 플래그 값
pub const ACCEPT_FLAG: u8 = 1;

/// DFA 테이블 키
///
/// # 메모리 레이아웃 (8 바이트)
/// ```text
/// offset  field   size
/// 0       state   4
/// 4       unit    1
/// 5       _pad    3
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DfaKey {
    /// 현재 상태 ID
    pub state: u32,
    /// 입력 바이트
    pub unit: u8,
    /// 정렬 패딩 (항상 0)
    pub _pad: [u8; 3],
}

/// DFA 테이블 값
///
/// # 메모리 레이아웃 (8 바이트)
/// ```text
/// offset  field   size
/// 0       state   4
/// 4       flag    1
/// 5       _pad    3
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfaValue {
    /// 다음 상태 ID
    pub state: u32,
    /// 다음 상태가 수락 상태이면 [`ACCEPT_FLAG`], 아니면 0
    pub flag: u8,
    /// 정렬 패딩 (항상 0)
    pub _pad: [u8; 3],
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for DfaKey {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for DfaValue {}

impl DfaKey {
    /// 키 크기 (바이트)
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// 새 키를 생성합니다.
    pub const fn new(state: u32, unit: u8) -> Self {
        Self {
            state,
            unit,
            _pad: [0; 3],
        }
    }

    /// 호스트 바이트 오더로 직렬화합니다.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.state.to_ne_bytes());
        out[4] = self.unit;
        out
    }

    /// 호스트 바이트 오더 바이트열에서 복원합니다.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self::new(
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            bytes[4],
        )
    }
}

impl DfaValue {
    /// 값 크기 (바이트, 패딩 전)
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// 새 값을 생성합니다.
    pub const fn new(state: u32, accepting: bool) -> Self {
        Self {
            state,
            flag: if accepting { ACCEPT_FLAG } else { 0 },
            _pad: [0; 3],
        }
    }

    /// 수락 여부
    pub const fn is_accepting(&self) -> bool {
        self.flag == ACCEPT_FLAG
    }

    /// 호스트 바이트 오더로 `out`의 앞부분에 기록합니다.
    ///
    /// `out`은 최소 [`Self::SIZE`] 바이트여야 합니다.
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.state.to_ne_bytes());
        out[4] = self.flag;
        out[5..Self::SIZE].fill(0);
    }

    /// 호스트 바이트 오더 바이트열에서 복원합니다.
    ///
    /// `bytes`는 최소 [`Self::SIZE`] 바이트여야 합니다.
    pub fn read_from(bytes: &[u8]) -> Self {
        Self {
            state: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            flag: bytes[4],
            _pad: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_are_eight_bytes() {
        assert_eq!(DfaKey::SIZE, 8);
        assert_eq!(DfaValue::SIZE, 8);
        assert_eq!(DfaValue::SIZE % VALUE_STRIDE, 0);
    }

    #[test]
    fn key_bytes_roundtrip_and_zero_padding() {
        let key = DfaKey::new(0x0102_0304, b'z');
        let bytes = key.to_bytes();
        assert_eq!(&bytes[5..], &[0, 0, 0]);
        assert_eq!(DfaKey::from_bytes(&bytes), key);
    }

    #[test]
    fn value_write_clears_padding() {
        let mut buf = [0xffu8; 8];
        DfaValue::new(9, true).write_to(&mut buf);
        assert_eq!(&buf[5..], &[0, 0, 0]);
        let value = DfaValue::read_from(&buf);
        assert_eq!(value.state, 9);
        assert!(value.is_accepting());
    }
}
