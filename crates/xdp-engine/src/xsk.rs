//! AF_XDP 소켓 (Linux 전용)
//!
//! libxdp 없이 소켓을 직접 구성합니다.
//! 1. `socket(AF_XDP)` → UMEM 등록 (`XDP_UMEM_REG`)
//! 2. 링 크기 설정 → `XDP_MMAP_OFFSETS` 조회 → 네 링을 `mmap`
//! 3. `bind(ifindex, queue)`
//!
//! 소켓 맵(`xsks_map`) 등록은 XDP 프로그램을 붙이는 쪽이 합니다.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use tracing::{debug, info};

use xids_core::config::{BindMode, DatapathConfig, InterfaceConfig};
use xids_core::error::DatapathError;

use crate::datapath::{DatapathRings, XskIo};
use crate::ring::{Consumer, Producer, RingLayout, RingMemory, XdpDesc};
use crate::umem::Umem;

const AF_XDP: libc::c_int = 44;
const SOL_XDP: libc::c_int = 283;

// SOL_XDP 소켓 옵션
const XDP_MMAP_OFFSETS: libc::c_int = 1;
const XDP_RX_RING: libc::c_int = 2;
const XDP_TX_RING: libc::c_int = 3;
const XDP_UMEM_REG: libc::c_int = 4;
const XDP_UMEM_FILL_RING: libc::c_int = 5;
const XDP_UMEM_COMPLETION_RING: libc::c_int = 6;

// 링 mmap 오프셋
const XDP_PGOFF_RX_RING: libc::off_t = 0;
const XDP_PGOFF_TX_RING: libc::off_t = 0x8000_0000;
const XDP_UMEM_PGOFF_FILL_RING: libc::off_t = 0x1_0000_0000;
const XDP_UMEM_PGOFF_COMPLETION_RING: libc::off_t = 0x1_8000_0000;

// bind 플래그
const XDP_COPY: u16 = 1 << 1;
const XDP_ZEROCOPY: u16 = 1 << 2;
const XDP_USE_NEED_WAKEUP: u16 = 1 << 3;

#[repr(C)]
#[derive(Default)]
struct XdpUmemReg {
    addr: u64,
    len: u64,
    chunk_size: u32,
    headroom: u32,
    flags: u32,
    tx_metadata_len: u32,
}

#[repr(C)]
#[derive(Default)]
struct SockaddrXdp {
    family: u16,
    flags: u16,
    ifindex: u32,
    queue_id: u32,
    shared_umem_fd: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct RingOffset {
    producer: u64,
    consumer: u64,
    desc: u64,
    flags: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct MmapOffsets {
    rx: RingOffset,
    tx: RingOffset,
    fr: RingOffset,
    cr: RingOffset,
}

/// 커널 링 매핑
struct MmapRing {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: 매핑은 링 핸들들이 공유하며, 접근은 커서 프로토콜로 조율됨
unsafe impl Send for MmapRing {}
unsafe impl Sync for MmapRing {}
impl RingMemory for MmapRing {}

impl Drop for MmapRing {
    fn drop(&mut self) {
        // SAFETY: map_ring에서 얻은 매핑
        unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
    }
}

fn setup_err(stage: &'static str, err: impl std::fmt::Display) -> DatapathError {
    DatapathError::Setup {
        stage,
        reason: err.to_string(),
    }
}

fn check(ret: libc::c_int, stage: &'static str) -> Result<(), DatapathError> {
    if ret < 0 {
        Err(setup_err(stage, io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

fn set_opt<T>(fd: BorrowedFd<'_>, opt: libc::c_int, value: &T, stage: &'static str) -> Result<(), DatapathError> {
    // SAFETY: value는 opt에 맞는 repr(C) 값이며 호출 동안 유효함
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_XDP,
            opt,
            (value as *const T).cast(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    check(ret, stage)
}

fn mmap_offsets(fd: BorrowedFd<'_>) -> Result<MmapOffsets, DatapathError> {
    let mut offsets = MmapOffsets::default();
    let mut len = mem::size_of::<MmapOffsets>() as libc::socklen_t;
    // SAFETY: offsets는 len 바이트 버퍼
    let ret = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            SOL_XDP,
            XDP_MMAP_OFFSETS,
            (&mut offsets as *mut MmapOffsets).cast(),
            &mut len,
        )
    };
    check(ret, "mmap offsets")?;
    if len as usize != mem::size_of::<MmapOffsets>() {
        return Err(setup_err(
            "mmap offsets",
            format!("kernel returned {len} bytes, ring flags unsupported"),
        ));
    }
    Ok(offsets)
}

fn map_ring<T>(
    fd: BorrowedFd<'_>,
    offset: RingOffset,
    size: u32,
    pgoff: libc::off_t,
    stage: &'static str,
) -> Result<(RingLayout<T>, Arc<dyn RingMemory>), DatapathError> {
    let len = offset.desc as usize + size as usize * mem::size_of::<T>();
    // SAFETY: 커널 링 매핑, 반환값을 검사함
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd.as_raw_fd(),
            pgoff,
        )
    };
    if raw == libc::MAP_FAILED {
        return Err(setup_err(stage, io::Error::last_os_error()));
    }
    let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| setup_err(stage, "mmap returned null"))?;
    let base = ptr.as_ptr();

    // SAFETY: 오프셋은 커널이 보고한 매핑 내부 위치
    let layout = unsafe {
        RingLayout {
            producer: base.add(offset.producer as usize).cast::<AtomicU32>(),
            consumer: base.add(offset.consumer as usize).cast::<AtomicU32>(),
            flags: base.add(offset.flags as usize).cast::<AtomicU32>(),
            descs: base.add(offset.desc as usize).cast::<T>(),
            size,
        }
    };
    Ok((layout, Arc::new(MmapRing { ptr, len })))
}

/// 인터페이스 이름을 인덱스로 바꿉니다.
pub fn interface_index(name: &str) -> Result<u32, DatapathError> {
    let interface = |reason: String| DatapathError::Interface {
        name: name.to_owned(),
        reason,
    };
    let c_name = CString::new(name).map_err(|e| interface(e.to_string()))?;
    // SAFETY: 널 종료 문자열
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(interface(io::Error::last_os_error().to_string()));
    }
    Ok(index)
}

/// 바인드된 AF_XDP 소켓
#[derive(Debug)]
pub struct XskSocket {
    fd: OwnedFd,
    ifindex: u32,
    queue: u32,
}

impl XskSocket {
    /// 인터페이스 큐에 소켓을 만들고 UMEM과 링을 반환합니다.
    ///
    /// # 에러
    /// - `DatapathError::Interface`: 인터페이스가 없는 경우
    /// - `DatapathError::Setup`: 소켓, UMEM, 링, bind 중 하나가 실패한 경우
    pub fn open(
        interface: &InterfaceConfig,
        config: &DatapathConfig,
    ) -> Result<(Umem, DatapathRings, Self), DatapathError> {
        let ifindex = interface_index(&interface.device)?;

        // SAFETY: 인자 검사는 커널이 수행
        let raw = unsafe { libc::socket(AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) };
        check(raw, "socket")?;
        // SAFETY: 방금 만든 유효한 fd
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        let sock = fd.as_fd();

        let umem = Umem::mmap(config.frame_count, config.frame_size)?;
        let reg = XdpUmemReg {
            addr: umem.area().as_ptr() as u64,
            len: umem.area().len() as u64,
            chunk_size: config.frame_size,
            ..XdpUmemReg::default()
        };
        set_opt(sock, XDP_UMEM_REG, &reg, "umem register")?;

        set_opt(sock, XDP_UMEM_FILL_RING, &config.fill_ring_size, "fill ring")?;
        set_opt(sock, XDP_UMEM_COMPLETION_RING, &config.comp_ring_size, "completion ring")?;
        set_opt(sock, XDP_RX_RING, &config.rx_ring_size, "rx ring")?;
        set_opt(sock, XDP_TX_RING, &config.tx_ring_size, "tx ring")?;

        let off = mmap_offsets(sock)?;
        debug!(?off, "ring offsets");

        let (layout, memory) = map_ring::<u64>(sock, off.fr, config.fill_ring_size, XDP_UMEM_PGOFF_FILL_RING, "fill ring")?;
        let fill = Producer::new(layout, memory);
        let (layout, memory) = map_ring::<u64>(
            sock,
            off.cr,
            config.comp_ring_size,
            XDP_UMEM_PGOFF_COMPLETION_RING,
            "completion ring",
        )?;
        let comp = Consumer::new(layout, memory);
        let (layout, memory) = map_ring::<XdpDesc>(sock, off.rx, config.rx_ring_size, XDP_PGOFF_RX_RING, "rx ring")?;
        let rx = Consumer::new(layout, memory);
        let (layout, memory) = map_ring::<XdpDesc>(sock, off.tx, config.tx_ring_size, XDP_PGOFF_TX_RING, "tx ring")?;
        let tx = Producer::new(layout, memory);

        let mut flags = match interface.bind_mode {
            BindMode::Auto => 0,
            BindMode::Copy => XDP_COPY,
            BindMode::Zerocopy => XDP_ZEROCOPY,
        };
        if interface.need_wakeup {
            flags |= XDP_USE_NEED_WAKEUP;
        }
        let addr = SockaddrXdp {
            family: AF_XDP as u16,
            flags,
            ifindex,
            queue_id: interface.queue,
            shared_umem_fd: 0,
        };
        // SAFETY: addr는 sockaddr_xdp 레이아웃
        let ret = unsafe {
            libc::bind(
                sock.as_raw_fd(),
                (&addr as *const SockaddrXdp).cast(),
                mem::size_of::<SockaddrXdp>() as libc::socklen_t,
            )
        };
        check(ret, "bind").map_err(|e| match e {
            DatapathError::Setup { reason, .. } => DatapathError::Setup {
                stage: "bind",
                reason: format!("{}/{} ({:?}): {reason}", interface.device, interface.queue, interface.bind_mode),
            },
            other => other,
        })?;

        info!(
            device = %interface.device,
            ifindex,
            queue = interface.queue,
            bind_mode = ?interface.bind_mode,
            need_wakeup = interface.need_wakeup,
            frames = config.frame_count,
            frame_size = config.frame_size,
            "AF_XDP socket bound"
        );

        let rings = DatapathRings { fill, comp, rx, tx };
        Ok((umem, rings, Self {
            fd,
            ifindex,
            queue: interface.queue,
        }))
    }

    /// 인터페이스 인덱스
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// 바인드된 큐 번호
    pub fn queue(&self) -> u32 {
        self.queue
    }

    fn nudge(&self, send: bool) -> Result<(), DatapathError> {
        let fd = self.fd.as_raw_fd();
        // SAFETY: 빈 버퍼로 커널 처리만 트리거
        let ret = unsafe {
            if send {
                libc::sendto(fd, ptr::null(), 0, libc::MSG_DONTWAIT, ptr::null(), 0)
            } else {
                libc::recvfrom(fd, ptr::null_mut(), 0, libc::MSG_DONTWAIT, ptr::null_mut(), ptr::null_mut())
            }
        };
        if ret >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // 커널이 아직 바쁘거나 링크가 내려감: 다음 배치에서 다시 시도
            Some(libc::EAGAIN | libc::EBUSY | libc::ENOBUFS | libc::ENETDOWN) => Ok(()),
            _ => Err(DatapathError::Io(err)),
        }
    }
}

impl AsFd for XskSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl XskIo for XskSocket {
    fn wait(&mut self, timeout: Duration) -> Result<bool, DatapathError> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: pfd 하나짜리 배열
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(DatapathError::Io(err));
        }
        Ok(ret > 0)
    }

    fn kick_tx(&mut self) -> Result<(), DatapathError> {
        self.nudge(true)
    }

    fn wake_rx(&mut self) -> Result<(), DatapathError> {
        self.nudge(false)
    }
}
