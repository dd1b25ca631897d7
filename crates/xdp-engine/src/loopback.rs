//! 루프백 — 커널 없이 데이터패스를 구동
//!
//! 힙 UMEM과 힙 링으로 데이터패스를 만들고, 커널 쪽 역할(fill 소비, rx 생산,
//! tx 소비, completion 생산)은 [`KernelPeer`]가 맡습니다.
//! 통합 테스트와 벤치마크에서 사용합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use xids_core::config::DatapathConfig;
use xids_core::error::DatapathError;

use crate::datapath::{Datapath, DatapathOptions, DatapathRings, XskIo};
use crate::ring::{Consumer, Producer, XdpDesc, heap_ring};
use crate::umem::{Area, Umem};

#[derive(Debug, Default)]
struct Doorbell {
    rx_ready: AtomicBool,
    tx_kicks: AtomicU64,
    rx_wakeups: AtomicU64,
}

/// 루프백 이벤트 인터페이스
#[derive(Debug, Clone)]
pub struct LoopbackIo {
    doorbell: Arc<Doorbell>,
}

impl XskIo for LoopbackIo {
    fn wait(&mut self, timeout: Duration) -> Result<bool, DatapathError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.doorbell.rx_ready.swap(false, Ordering::AcqRel) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn kick_tx(&mut self) -> Result<(), DatapathError> {
        self.doorbell.tx_kicks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn wake_rx(&mut self) -> Result<(), DatapathError> {
        self.doorbell.rx_wakeups.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// 커널 역할을 하는 링 반대편
pub struct KernelPeer {
    fill: Consumer<u64>,
    comp: Producer<u64>,
    rx: Producer<XdpDesc>,
    tx: Consumer<XdpDesc>,
    area: Arc<Area>,
    frame_size: u32,
    doorbell: Arc<Doorbell>,
}

impl KernelPeer {
    /// 패킷을 fill 프레임에 복사해 수신 링에 넣습니다.
    ///
    /// fill 프레임이나 rx 슬롯이 없으면 `false` (NIC 드롭과 같음).
    /// 프레임보다 긴 패킷은 잘립니다.
    pub fn inject(&mut self, packet: &[u8]) -> bool {
        let Some(slot) = self.rx.reserve(1) else {
            return false;
        };
        let (n, idx) = self.fill.peek(1);
        if n == 0 {
            self.rx.cancel(1);
            return false;
        }
        let addr = self.fill.read(idx);
        self.fill.release(1);

        let len = packet.len().min(self.frame_size as usize);
        let offset = addr as usize;
        if offset + len > self.area.len() {
            self.rx.cancel(1);
            return false;
        }
        // SAFETY: fill 링에서 받은 프레임은 rx 제출 전까지 피어가 배타적으로 소유
        unsafe { self.area.slice_mut(offset, len) }.copy_from_slice(&packet[..len]);

        self.push_rx(
            slot,
            XdpDesc {
                addr,
                len: len as u32,
                options: 0,
            },
        );
        true
    }

    /// 임의의 디스크립터를 수신 링에 넣습니다 (fill 링을 거치지 않음).
    pub fn inject_desc(&mut self, desc: XdpDesc) -> bool {
        let Some(slot) = self.rx.reserve(1) else {
            return false;
        };
        self.push_rx(slot, desc);
        true
    }

    fn push_rx(&mut self, slot: u32, desc: XdpDesc) {
        self.rx.write(slot, desc);
        self.rx.submit(1);
        self.doorbell.rx_ready.store(true, Ordering::Release);
    }

    /// 송신 링의 패킷을 모두 꺼내 completion 링으로 돌려주고 내용을 반환합니다.
    pub fn drain_tx(&mut self) -> Vec<Vec<u8>> {
        let descs = self.take_tx();
        let packets = descs
            .iter()
            .map(|desc| {
                let offset = desc.addr as usize;
                let len = desc.len as usize;
                if offset + len > self.area.len() {
                    return Vec::new();
                }
                // SAFETY: completion 전까지 송신 프레임은 피어 소유
                unsafe { self.area.slice(offset, len) }.to_vec()
            })
            .collect();
        self.complete(descs.iter().map(|d| d.addr));
        packets
    }

    /// 송신 링의 디스크립터를 꺼냅니다 (completion은 하지 않음).
    ///
    /// completion 링에 돌려줄 자리가 있는 만큼만 꺼냅니다.
    pub fn take_tx(&mut self) -> Vec<XdpDesc> {
        let room = self.comp.free_entries(self.comp.size());
        let (n, first) = self.tx.peek(room);
        let descs = (0..n).map(|i| self.tx.read(first.wrapping_add(i))).collect();
        self.tx.release(n);
        descs
    }

    /// 주소들을 completion 링에 넣습니다. 자리가 모자라면 넣은 수만 반환합니다.
    pub fn complete(&mut self, addrs: impl IntoIterator<Item = u64>) -> u32 {
        let addrs: Vec<u64> = addrs.into_iter().collect();
        let n = (addrs.len() as u32).min(self.comp.free_entries(addrs.len() as u32));
        if n == 0 {
            return 0;
        }
        let Some(first) = self.comp.reserve(n) else {
            return 0;
        };
        for (i, addr) in addrs.iter().take(n as usize).enumerate() {
            self.comp.write(first.wrapping_add(i as u32), *addr);
        }
        self.comp.submit(n);
        n
    }

    /// fill/tx 링의 need-wakeup 플래그를 설정합니다.
    pub fn set_need_wakeup(&self, on: bool) {
        self.fill.set_need_wakeup(on);
        self.tx.set_need_wakeup(on);
    }

    /// 데이터패스가 요청한 tx kick 횟수
    pub fn tx_kicks(&self) -> u64 {
        self.doorbell.tx_kicks.load(Ordering::Relaxed)
    }

    /// 데이터패스가 요청한 rx wakeup 횟수
    pub fn rx_wakeups(&self) -> u64 {
        self.doorbell.rx_wakeups.load(Ordering::Relaxed)
    }
}

fn ring<T: Copy + Default + Send + 'static>(
    name: &str,
    size: u32,
) -> Result<(Producer<T>, Consumer<T>), DatapathError> {
    heap_ring(size).ok_or_else(|| DatapathError::Setup {
        stage: "rings",
        reason: format!("{name} ring size {size} is not a power of two"),
    })
}

/// 루프백 구성 요소를 생성합니다.
///
/// 반환된 UMEM/링/IO로 [`Datapath::builder`]를 직접 구성할 때 사용합니다.
pub fn endpoints(
    config: &DatapathConfig,
) -> Result<(Umem, DatapathRings, LoopbackIo, KernelPeer), DatapathError> {
    let umem = Umem::heap(config.frame_count, config.frame_size)?;
    let (fill_prod, fill_cons) = ring::<u64>("fill", config.fill_ring_size)?;
    let (comp_prod, comp_cons) = ring::<u64>("completion", config.comp_ring_size)?;
    let (rx_prod, rx_cons) = ring::<XdpDesc>("rx", config.rx_ring_size)?;
    let (tx_prod, tx_cons) = ring::<XdpDesc>("tx", config.tx_ring_size)?;

    let doorbell = Arc::new(Doorbell::default());
    let peer = KernelPeer {
        fill: fill_cons,
        comp: comp_prod,
        rx: rx_prod,
        tx: tx_cons,
        area: Arc::clone(umem.area()),
        frame_size: umem.frame_size(),
        doorbell: Arc::clone(&doorbell),
    };
    let rings = DatapathRings {
        fill: fill_prod,
        comp: comp_cons,
        rx: rx_cons,
        tx: tx_prod,
    };
    Ok((umem, rings, LoopbackIo { doorbell }, peer))
}

/// 루프백 데이터패스와 커널 피어를 생성합니다.
pub fn pair(
    config: &DatapathConfig,
    options: DatapathOptions,
) -> Result<(Datapath<LoopbackIo>, KernelPeer), DatapathError> {
    let (umem, rings, io, peer) = endpoints(config)?;
    let datapath = Datapath::builder(umem, rings, io).options(options).build()?;
    Ok((datapath, peer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DatapathConfig {
        DatapathConfig {
            frame_count: 4,
            frame_size: 256,
            rx_ring_size: 4,
            tx_ring_size: 4,
            fill_ring_size: 4,
            comp_ring_size: 4,
            ..DatapathConfig::default()
        }
    }

    #[test]
    fn non_power_of_two_ring_is_rejected() {
        let config = DatapathConfig {
            rx_ring_size: 3,
            ..small()
        };
        assert!(matches!(
            endpoints(&config),
            Err(DatapathError::Setup { stage: "rings", .. })
        ));
    }

    #[test]
    fn inject_fails_without_fill_frames() {
        // fill 링이 채워지기 전에는 수신할 프레임이 없음
        let (_umem, _rings, _io, mut peer) = endpoints(&small()).unwrap();
        assert!(!peer.inject(b"no frames"));
    }

    #[test]
    fn inject_truncates_to_frame_size() {
        let (mut dp, mut peer) = pair(&small(), DatapathOptions::default()).unwrap();
        assert!(peer.inject(&[7u8; 300]));
        dp.process_batch().unwrap();
        let out = peer.drain_tx();
        assert_eq!(out, vec![vec![7u8; 256]]);
    }

    #[test]
    fn inject_stops_when_frames_run_out() {
        let (_dp, mut peer) = pair(&small(), DatapathOptions::default()).unwrap();
        for _ in 0..4 {
            assert!(peer.inject(b"x"));
        }
        assert!(!peer.inject(b"x"));
    }

    #[test]
    fn wait_times_out_and_wakes_on_inject() {
        let (_umem, _rings, mut io, mut peer) = endpoints(&small()).unwrap();
        assert!(!io.wait(Duration::from_millis(2)).unwrap());
        peer.inject_desc(XdpDesc::default());
        assert!(io.wait(Duration::from_millis(2)).unwrap());
    }

    #[test]
    fn rx_wakeup_requested_when_fill_ring_flagged() {
        let (mut dp, peer) = pair(&small(), DatapathOptions::default()).unwrap();
        peer.set_need_wakeup(true);
        dp.process_batch().unwrap();
        assert_eq!(peer.rx_wakeups(), 1);
    }
}
