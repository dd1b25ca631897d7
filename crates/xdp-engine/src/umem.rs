//! UMEM — 고정 크기 프레임 아레나와 프레임 소유권 상태 머신
//!
//! 커널과 공유하는 패킷 버퍼 영역을 `frame_count × frame_size` 바이트의 프레임으로 나누고,
//! 디스크립터 주소(`addr`)는 프레임 인덱스와 프레임 내 오프셋으로 해석합니다.
//!
//! # 프레임 상태
//! ```text
//!            alloc_for_fill        receive           transmit
//!   Free ────────────────▶ FillQueued ─────▶ Processing ─────▶ Transmitting
//!    ▲                                          │                   │
//!    └───────────────── release (drop) ─────────┘                   │
//!    └───────────────────────── complete ───────────────────────────┘
//! ```
//! 다른 상태에서의 전이(이중 해제 등)는 `DatapathError::FrameState`로 거부됩니다.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use xids_core::error::DatapathError;

/// 프레임 인덱스
pub type FrameId = u32;

/// 영역 정렬 (페이지)
const AREA_ALIGN: usize = 4096;

/// 프레임 소유 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// 사용자 공간 free 목록
    Free,
    /// fill 링에 제출됨 (커널 소유, 수신 대기)
    FillQueued,
    /// 수신 링에서 꺼내 처리 중
    Processing,
    /// 송신 링에 제출됨 (completion 대기)
    Transmitting,
}

impl FrameState {
    /// 상태 이름
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::FillQueued => "fill-queued",
            Self::Processing => "processing",
            Self::Transmitting => "transmitting",
        }
    }
}

/// 상태별 프레임 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub free: usize,
    pub fill_queued: usize,
    pub processing: usize,
    pub transmitting: usize,
}

enum Backing {
    Heap(Layout),
    #[cfg(target_os = "linux")]
    Mmap,
}

/// 프레임 메모리 영역
///
/// 커널(또는 루프백 피어)과 공유되므로 `Arc`로 보관합니다.
/// 한 프레임은 상태 머신상 한 시점에 한 소유자만 접근합니다.
pub(crate) struct Area {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: 영역은 프레임 단위로 소유권이 분리되며, 동시 접근은 서로 다른 프레임에만 발생함
unsafe impl Send for Area {}
unsafe impl Sync for Area {}

impl Area {
    fn heap(len: usize) -> Result<Self, DatapathError> {
        let setup = |reason: String| DatapathError::Setup {
            stage: "umem",
            reason,
        };
        let layout = Layout::from_size_align(len, AREA_ALIGN).map_err(|e| setup(e.to_string()))?;
        if layout.size() == 0 {
            return Err(setup("umem must not be empty".to_owned()));
        }
        // SAFETY: layout 크기가 0이 아님
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| setup(format!("failed to allocate {len} bytes")))?;
        Ok(Self {
            ptr,
            len,
            backing: Backing::Heap(layout),
        })
    }

    #[cfg(target_os = "linux")]
    fn mmap(len: usize) -> Result<Self, DatapathError> {
        if len == 0 {
            return Err(DatapathError::Setup {
                stage: "umem",
                reason: "umem must not be empty".to_owned(),
            });
        }
        // SAFETY: 익명 매핑, 반환값을 검사함
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(DatapathError::Setup {
                stage: "umem",
                reason: format!("mmap of {len} bytes failed: {}", std::io::Error::last_os_error()),
            });
        }
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or(DatapathError::Setup {
            stage: "umem",
            reason: "mmap returned null".to_owned(),
        })?;
        Ok(Self {
            ptr,
            len,
            backing: Backing::Mmap,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// `offset + len <= self.len`이고 해당 범위에 동시 쓰기가 없어야 함
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        // SAFETY: 호출자가 범위와 소유권을 보장
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// # Safety
    /// `offset + len <= self.len`이고 해당 범위에 대한 배타적 소유권을 가져야 함
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        // SAFETY: 호출자가 범위와 소유권을 보장
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }
}

impl Drop for Area {
    fn drop(&mut self) {
        match self.backing {
            // SAFETY: 같은 layout으로 할당한 포인터
            Backing::Heap(layout) => unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) },
            #[cfg(target_os = "linux")]
            Backing::Mmap => {
                // SAFETY: mmap으로 얻은 영역
                unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
            }
        }
    }
}

/// 프레임 아레나
pub struct Umem {
    area: Arc<Area>,
    frame_size: u32,
    states: Vec<FrameState>,
    free: Vec<FrameId>,
}

impl std::fmt::Debug for Umem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Umem")
            .field("frame_size", &self.frame_size)
            .field("frame_count", &self.states.len())
            .field("counts", &self.counts())
            .finish()
    }
}

impl Umem {
    /// 힙 메모리로 아레나를 생성합니다 (루프백, 테스트).
    pub fn heap(frame_count: u32, frame_size: u32) -> Result<Self, DatapathError> {
        let area = Area::heap(frame_count as usize * frame_size as usize)?;
        Ok(Self::with_area(area, frame_count, frame_size))
    }

    /// 익명 mmap으로 아레나를 생성합니다 (커널 UMEM 등록용).
    #[cfg(target_os = "linux")]
    pub fn mmap(frame_count: u32, frame_size: u32) -> Result<Self, DatapathError> {
        let area = Area::mmap(frame_count as usize * frame_size as usize)?;
        Ok(Self::with_area(area, frame_count, frame_size))
    }

    fn with_area(area: Area, frame_count: u32, frame_size: u32) -> Self {
        Self {
            area: Arc::new(area),
            frame_size,
            states: vec![FrameState::Free; frame_count as usize],
            // 낮은 인덱스부터 할당되도록 역순으로 쌓음
            free: (0..frame_count).rev().collect(),
        }
    }

    pub(crate) fn area(&self) -> &Arc<Area> {
        &self.area
    }

    /// 프레임 크기 (바이트)
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// 프레임 수
    pub fn frame_count(&self) -> u32 {
        self.states.len() as u32
    }

    /// free 목록의 프레임 수
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// 프레임 상태
    pub fn state(&self, frame: FrameId) -> Option<FrameState> {
        self.states.get(frame as usize).copied()
    }

    /// 상태별 프레임 수
    pub fn counts(&self) -> FrameCounts {
        let mut counts = FrameCounts::default();
        for state in &self.states {
            match state {
                FrameState::Free => counts.free += 1,
                FrameState::FillQueued => counts.fill_queued += 1,
                FrameState::Processing => counts.processing += 1,
                FrameState::Transmitting => counts.transmitting += 1,
            }
        }
        counts
    }

    /// 프레임 시작 주소
    pub fn addr_of(&self, frame: FrameId) -> u64 {
        u64::from(frame) * u64::from(self.frame_size)
    }

    /// 디스크립터 주소가 가리키는 프레임
    pub fn frame_of(&self, addr: u64) -> Result<FrameId, DatapathError> {
        let frame = addr / u64::from(self.frame_size);
        if frame >= self.states.len() as u64 {
            return Err(DatapathError::AddressOutOfRange {
                addr,
                size: self.area.len() as u64,
            });
        }
        Ok(frame as FrameId)
    }

    /// free 프레임 하나를 fill 링 제출용으로 꺼냅니다 (`Free → FillQueued`).
    pub fn alloc_for_fill(&mut self) -> Option<u64> {
        let frame = self.free.pop()?;
        self.states[frame as usize] = FrameState::FillQueued;
        Some(self.addr_of(frame))
    }

    /// 수신 디스크립터의 프레임을 가져옵니다 (`FillQueued → Processing`).
    pub fn receive(&mut self, addr: u64) -> Result<FrameId, DatapathError> {
        let frame = self.frame_of(addr)?;
        self.transition(frame, FrameState::FillQueued, FrameState::Processing)?;
        Ok(frame)
    }

    /// 처리 중인 프레임을 송신 링에 넘깁니다 (`Processing → Transmitting`).
    pub fn transmit(&mut self, frame: FrameId) -> Result<(), DatapathError> {
        self.transition(frame, FrameState::Processing, FrameState::Transmitting)
    }

    /// 처리 중인 프레임을 송신 없이 반환합니다 (`Processing → Free`).
    pub fn release(&mut self, frame: FrameId) -> Result<(), DatapathError> {
        self.transition(frame, FrameState::Processing, FrameState::Free)?;
        self.free.push(frame);
        Ok(())
    }

    /// 송신 완료된 프레임을 반환합니다 (`Transmitting → Free`).
    pub fn complete(&mut self, addr: u64) -> Result<FrameId, DatapathError> {
        let frame = self.frame_of(addr)?;
        self.transition(frame, FrameState::Transmitting, FrameState::Free)?;
        self.free.push(frame);
        Ok(frame)
    }

    /// 디스크립터 `(addr, len)`이 가리키는 바이트열
    ///
    /// 범위가 프레임 경계를 넘으면 `DatapathError::AddressOutOfRange`를 반환합니다.
    pub fn data(&self, addr: u64, len: u32) -> Result<&[u8], DatapathError> {
        let offset = self.checked_range(addr, len)?;
        // SAFETY: 범위를 검증했고, &self 대여 동안 사용자 공간 쓰기는 발생하지 않음
        Ok(unsafe { self.area.slice(offset, len as usize) })
    }

    /// 처리 중인 프레임의 바이트열 (쓰기 가능)
    pub fn data_mut(&mut self, addr: u64, len: u32) -> Result<&mut [u8], DatapathError> {
        let offset = self.checked_range(addr, len)?;
        let frame = self.frame_of(addr)?;
        let state = self.states[frame as usize];
        if state != FrameState::Processing {
            return Err(DatapathError::FrameState {
                frame,
                expected: FrameState::Processing.as_str(),
                actual: state.as_str(),
            });
        }
        // SAFETY: 범위를 검증했고 Processing 프레임은 사용자 공간이 배타적으로 소유
        Ok(unsafe { self.area.slice_mut(offset, len as usize) })
    }

    fn checked_range(&self, addr: u64, len: u32) -> Result<usize, DatapathError> {
        let frame_size = u64::from(self.frame_size);
        let out_of_range = DatapathError::AddressOutOfRange {
            addr,
            size: self.area.len() as u64,
        };
        if addr / frame_size >= self.states.len() as u64 {
            return Err(out_of_range);
        }
        if addr % frame_size + u64::from(len) > frame_size {
            return Err(out_of_range);
        }
        Ok(addr as usize)
    }

    fn transition(
        &mut self,
        frame: FrameId,
        from: FrameState,
        to: FrameState,
    ) -> Result<(), DatapathError> {
        let slot = self
            .states
            .get_mut(frame as usize)
            .ok_or(DatapathError::AddressOutOfRange {
                addr: u64::from(frame) * u64::from(self.frame_size),
                size: self.area.len() as u64,
            })?;
        if *slot != from {
            return Err(DatapathError::FrameState {
                frame,
                expected: from.as_str(),
                actual: slot.as_str(),
            });
        }
        *slot = to;
        Ok(())
    }
}
