//! 단일 생산자/단일 소비자 디스크립터 링
//!
//! AF_XDP 링 프로토콜(libxdp `xsk_ring_prod` / `xsk_ring_cons`)을 그대로 따릅니다.
//! - 생산자: `reserve` → `write` → `submit` (Release store)
//! - 소비자: `peek` → `read` → `release` (Release store)
//! - 상대편 커서는 필요할 때만 Acquire로 다시 읽고 그 사이에는 캐시를 사용
//!
//! 링 메모리는 커널 `mmap` 영역이거나 힙(루프백)입니다. 어느 쪽이든
//! 커서/플래그/디스크립터 배열의 위치만 [`RingLayout`]으로 전달됩니다.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// 링 플래그: 커널이 wakeup(`poll`/`sendto`)을 필요로 함
pub const XDP_RING_NEED_WAKEUP: u32 = 1;

/// 수신/송신 디스크립터 (`struct xdp_desc`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XdpDesc {
    /// UMEM 내 주소
    pub addr: u64,
    /// 패킷 길이
    pub len: u32,
    /// 옵션 (사용 안 함)
    pub options: u32,
}

/// 링 메모리 위치
#[derive(Clone, Copy)]
pub(crate) struct RingLayout<T> {
    pub producer: *const AtomicU32,
    pub consumer: *const AtomicU32,
    pub flags: *const AtomicU32,
    pub descs: *mut T,
    pub size: u32,
}

/// 링 메모리 소유자 (마지막 핸들이 드롭될 때 해제)
pub(crate) trait RingMemory: Send + Sync {}

/// 힙 링 메모리
struct HeapRing<T> {
    producer: AtomicU32,
    consumer: AtomicU32,
    flags: AtomicU32,
    descs: Box<[UnsafeCell<T>]>,
}

// SAFETY: 디스크립터 슬롯은 커서 프로토콜로 생산자/소비자 간 배타적으로 넘겨짐
unsafe impl<T: Send> Send for HeapRing<T> {}
unsafe impl<T: Send> Sync for HeapRing<T> {}
impl<T: Send> RingMemory for HeapRing<T> {}

struct RingCore<T> {
    layout: RingLayout<T>,
    mask: u32,
    _memory: Arc<dyn RingMemory>,
    _marker: PhantomData<T>,
}

// SAFETY: layout의 포인터는 _memory가 살아 있는 동안 유효하며, 각 핸들은 한 스레드만 사용
unsafe impl<T: Send> Send for RingCore<T> {}

impl<T: Copy> RingCore<T> {
    fn new(layout: RingLayout<T>, memory: Arc<dyn RingMemory>) -> Self {
        Self {
            mask: layout.size - 1,
            layout,
            _memory: memory,
            _marker: PhantomData,
        }
    }

    fn producer(&self) -> &AtomicU32 {
        // SAFETY: 링 메모리가 살아 있는 동안 유효
        unsafe { &*self.layout.producer }
    }

    fn consumer(&self) -> &AtomicU32 {
        // SAFETY: 링 메모리가 살아 있는 동안 유효
        unsafe { &*self.layout.consumer }
    }

    fn flags(&self) -> &AtomicU32 {
        // SAFETY: 링 메모리가 살아 있는 동안 유효
        unsafe { &*self.layout.flags }
    }

    fn slot(&self, idx: u32) -> *mut T {
        // SAFETY: (idx & mask) < size
        unsafe { self.layout.descs.add((idx & self.mask) as usize) }
    }
}

/// 링 생산자 핸들
pub struct Producer<T> {
    core: RingCore<T>,
    cached_prod: u32,
    /// 소비자 커서 + 링 크기 (libxdp와 같은 표현)
    cached_cons: u32,
}

/// 링 소비자 핸들
pub struct Consumer<T> {
    core: RingCore<T>,
    cached_prod: u32,
    cached_cons: u32,
}

impl<T: Copy> Producer<T> {
    pub(crate) fn new(layout: RingLayout<T>, memory: Arc<dyn RingMemory>) -> Self {
        let core = RingCore::new(layout, memory);
        let prod = core.producer().load(Ordering::Relaxed);
        let cons = core.consumer().load(Ordering::Relaxed);
        Self {
            cached_prod: prod,
            cached_cons: cons.wrapping_add(layout.size),
            core,
        }
    }

    /// 링 크기
    pub fn size(&self) -> u32 {
        self.core.layout.size
    }

    /// 최소 `wanted`개의 빈 슬롯이 있는지 확인하고 빈 슬롯 수를 반환합니다.
    pub fn free_entries(&mut self, wanted: u32) -> u32 {
        let free = self.cached_cons.wrapping_sub(self.cached_prod);
        if free >= wanted {
            return free;
        }
        self.cached_cons = self
            .core
            .consumer()
            .load(Ordering::Acquire)
            .wrapping_add(self.core.layout.size);
        self.cached_cons.wrapping_sub(self.cached_prod)
    }

    /// `n`개 슬롯을 예약하고 첫 인덱스를 반환합니다. 부족하면 `None` (부분 예약 없음).
    pub fn reserve(&mut self, n: u32) -> Option<u32> {
        if self.free_entries(n) < n {
            return None;
        }
        let idx = self.cached_prod;
        self.cached_prod = self.cached_prod.wrapping_add(n);
        Some(idx)
    }

    /// 예약한 슬롯에 디스크립터를 씁니다.
    pub fn write(&mut self, idx: u32, desc: T) {
        // SAFETY: 예약된 슬롯은 submit 전까지 생산자만 접근
        unsafe { self.core.slot(idx).write(desc) };
    }

    /// 마지막으로 예약한 슬롯 중 `n`개의 예약을 취소합니다.
    pub fn cancel(&mut self, n: u32) {
        self.cached_prod = self.cached_prod.wrapping_sub(n);
    }

    /// 예약한 슬롯 `n`개를 소비자에게 공개합니다.
    pub fn submit(&mut self, n: u32) {
        let prod = self.core.producer().load(Ordering::Relaxed);
        self.core
            .producer()
            .store(prod.wrapping_add(n), Ordering::Release);
    }

    /// 커널이 wakeup을 요구하는지 여부
    pub fn needs_wakeup(&self) -> bool {
        self.core.flags().load(Ordering::Relaxed) & XDP_RING_NEED_WAKEUP != 0
    }
}

impl<T: Copy> Consumer<T> {
    pub(crate) fn new(layout: RingLayout<T>, memory: Arc<dyn RingMemory>) -> Self {
        let core = RingCore::new(layout, memory);
        let prod = core.producer().load(Ordering::Relaxed);
        let cons = core.consumer().load(Ordering::Relaxed);
        Self {
            cached_prod: prod,
            cached_cons: cons,
            core,
        }
    }

    /// 링 크기
    pub fn size(&self) -> u32 {
        self.core.layout.size
    }

    /// 읽을 수 있는 디스크립터 수 (최대 `wanted`)
    pub fn available(&mut self, wanted: u32) -> u32 {
        let mut entries = self.cached_prod.wrapping_sub(self.cached_cons);
        if entries == 0 {
            self.cached_prod = self.core.producer().load(Ordering::Acquire);
            entries = self.cached_prod.wrapping_sub(self.cached_cons);
        }
        entries.min(wanted)
    }

    /// 최대 `wanted`개를 확보하고 `(개수, 첫 인덱스)`를 반환합니다.
    pub fn peek(&mut self, wanted: u32) -> (u32, u32) {
        let n = self.available(wanted);
        let idx = self.cached_cons;
        self.cached_cons = self.cached_cons.wrapping_add(n);
        (n, idx)
    }

    /// 확보한 슬롯의 디스크립터를 읽습니다.
    pub fn read(&self, idx: u32) -> T {
        // SAFETY: peek로 확보한 슬롯은 release 전까지 생산자가 덮어쓰지 않음
        unsafe { self.core.slot(idx).read() }
    }

    /// 확보한 슬롯 `n`개를 생산자에게 돌려줍니다.
    pub fn release(&mut self, n: u32) {
        let cons = self.core.consumer().load(Ordering::Relaxed);
        self.core
            .consumer()
            .store(cons.wrapping_add(n), Ordering::Release);
    }

    /// 링 플래그 설정 (루프백 피어가 커널 역할을 할 때 사용)
    pub(crate) fn set_need_wakeup(&self, on: bool) {
        if on {
            self.core.flags().fetch_or(XDP_RING_NEED_WAKEUP, Ordering::Relaxed);
        } else {
            self.core
                .flags()
                .fetch_and(!XDP_RING_NEED_WAKEUP, Ordering::Relaxed);
        }
    }
}

/// 힙 메모리 링을 생성하고 `(생산자, 소비자)` 핸들을 반환합니다.
///
/// `size`는 2의 거듭제곱이어야 하며, 아니면 `None`을 반환합니다.
pub fn heap_ring<T: Copy + Default + Send + 'static>(size: u32) -> Option<(Producer<T>, Consumer<T>)> {
    if size == 0 || !size.is_power_of_two() {
        return None;
    }
    let ring = Arc::new(HeapRing {
        producer: AtomicU32::new(0),
        consumer: AtomicU32::new(0),
        flags: AtomicU32::new(0),
        descs: (0..size).map(|_| UnsafeCell::new(T::default())).collect(),
    });
    let layout = RingLayout {
        producer: &ring.producer,
        consumer: &ring.consumer,
        flags: &ring.flags,
        descs: UnsafeCell::raw_get(ring.descs.as_ptr()),
        size,
    };
    let memory: Arc<dyn RingMemory> = ring.clone();
    Some((
        Producer::new(layout, Arc::clone(&memory)),
        Consumer::new(layout, memory),
    ))
}
