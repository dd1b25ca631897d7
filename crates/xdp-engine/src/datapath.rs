//! 데이터패스 엔진 — 수신 → 헤더 검사 → 제로카피 전달
//!
//! [`Datapath`]는 UMEM과 네 개의 링(fill, completion, rx, tx)을 소유하고,
//! 한 OS 스레드에서 취소될 때까지 배치 단위로 패킷을 처리합니다.
//!
//! # 배치 처리 순서
//! 1. completion 링 회수 → 송신 끝난 프레임을 free로
//! 2. rx 링에서 최대 `batch_size`개 수신
//! 3. 헤더 검사 ([`parse::inspect`](crate::parse::inspect)), 결과와 무관하게 전달 시도
//! 4. tx 슬롯이 있으면 같은 프레임을 tx 링에 넣음 (복사 없음), 없으면 드롭 (backpressure)
//! 5. rx 슬롯 반환, fill 링 보충, 필요 시 tx kick
//!
//! 재시도는 없습니다. 송신 링이 가득 차면 가장 최근 패킷이 버려집니다.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use xids_core::config::{DatapathConfig, InterfaceConfig, parse_mac};
use xids_core::error::DatapathError;
use xids_ebpf_common::ETH_HLEN;

use crate::parse::{self, Inspection};
use crate::ring::{Consumer, Producer, XdpDesc};
use crate::stats::{DatapathCounters, DatapathSnapshot};
use crate::umem::Umem;

/// 커널(또는 루프백 피어)과의 이벤트 인터페이스
pub trait XskIo {
    /// 수신 준비 또는 `timeout`까지 대기합니다. 준비되었으면 `true`.
    fn wait(&mut self, timeout: Duration) -> Result<bool, DatapathError>;

    /// 커널에 송신 처리를 요청합니다.
    fn kick_tx(&mut self) -> Result<(), DatapathError>;

    /// 커널에 fill 링 처리를 요청합니다 (busy-poll 모드).
    fn wake_rx(&mut self) -> Result<(), DatapathError> {
        Ok(())
    }
}

/// 데이터패스가 소유하는 사용자 공간 쪽 링 핸들
pub struct DatapathRings {
    pub fill: Producer<u64>,
    pub comp: Consumer<u64>,
    pub rx: Consumer<XdpDesc>,
    pub tx: Producer<XdpDesc>,
}

/// 데이터패스 동작 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatapathOptions {
    /// 한 번에 처리할 최대 수신 디스크립터 수
    pub batch_size: u32,
    /// `poll`로 대기할지 여부 (false면 busy-poll)
    pub poll_mode: bool,
    /// poll 대기 상한 (취소 확인 지연 상한)
    pub poll_timeout: Duration,
    /// 링 need-wakeup 플래그를 따를지 여부
    pub need_wakeup: bool,
}

impl Default for DatapathOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            poll_mode: false,
            poll_timeout: Duration::from_millis(1000),
            need_wakeup: true,
        }
    }
}

impl DatapathOptions {
    /// 설정에서 옵션을 만듭니다.
    pub fn from_config(datapath: &DatapathConfig, interface: &InterfaceConfig) -> Self {
        Self {
            batch_size: datapath.batch_size,
            poll_mode: interface.poll_mode,
            poll_timeout: Duration::from_millis(datapath.poll_timeout_ms),
            need_wakeup: interface.need_wakeup,
        }
    }
}

/// 전달 프레임의 이더넷 주소 재작성
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacRewrite {
    /// 출발지 MAC
    pub src: Option<[u8; 6]>,
    /// 목적지 MAC
    pub dest: Option<[u8; 6]>,
}

impl MacRewrite {
    /// 인터페이스 설정에서 재작성 규칙을 만듭니다 (빈 값/잘못된 값은 미사용).
    pub fn from_config(interface: &InterfaceConfig) -> Self {
        Self {
            src: parse_mac(&interface.src_mac),
            dest: parse_mac(&interface.dest_mac),
        }
    }

    fn is_active(&self) -> bool {
        self.src.is_some() || self.dest.is_some()
    }

    fn apply(&self, frame: &mut [u8]) {
        if let Some(dest) = self.dest {
            frame[0..6].copy_from_slice(&dest);
        }
        if let Some(src) = self.src {
            frame[6..12].copy_from_slice(&src);
        }
    }
}

/// 배치 처리 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// 수신 디스크립터 수
    pub received: u32,
    /// 전달한 패킷 수
    pub forwarded: u32,
    /// tx 포화로 드롭한 패킷 수
    pub dropped: u32,
    /// 잘못된 디스크립터 수
    pub invalid: u32,
    /// 회수한 송신 완료 수
    pub completed: u32,
}

enum Disposition {
    Forwarded,
    Dropped,
    Invalid,
}

/// AF_XDP 데이터패스 엔진
pub struct Datapath<I: XskIo> {
    umem: Umem,
    rings: DatapathRings,
    io: I,
    counters: Arc<DatapathCounters>,
    options: DatapathOptions,
    rewrite: MacRewrite,
    outstanding_tx: u32,
}

/// 데이터패스 빌더
pub struct DatapathBuilder<I: XskIo> {
    umem: Umem,
    rings: DatapathRings,
    io: I,
    counters: Option<Arc<DatapathCounters>>,
    options: DatapathOptions,
    rewrite: MacRewrite,
}

impl<I: XskIo> DatapathBuilder<I> {
    /// 동작 옵션을 지정합니다.
    pub fn options(mut self, options: DatapathOptions) -> Self {
        self.options = options;
        self
    }

    /// 외부 카운터를 지정합니다 (통계 샘플러와 공유).
    pub fn counters(mut self, counters: Arc<DatapathCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// 전달 프레임의 MAC 재작성 규칙을 지정합니다.
    pub fn mac_rewrite(mut self, rewrite: MacRewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// 데이터패스를 만들고 fill 링을 채웁니다.
    ///
    /// # 에러
    /// - `DatapathError::Setup`: batch_size가 0인 경우
    pub fn build(self) -> Result<Datapath<I>, DatapathError> {
        if self.options.batch_size == 0 {
            return Err(DatapathError::Setup {
                stage: "datapath",
                reason: "batch_size must be greater than 0".to_owned(),
            });
        }

        let mut datapath = Datapath {
            umem: self.umem,
            rings: self.rings,
            io: self.io,
            counters: self.counters.unwrap_or_default(),
            options: self.options,
            rewrite: self.rewrite,
            outstanding_tx: 0,
        };
        let filled = datapath.refill();
        debug!(
            filled,
            frames = datapath.umem.frame_count(),
            frame_size = datapath.umem.frame_size(),
            batch_size = datapath.options.batch_size,
            "fill ring primed"
        );
        Ok(datapath)
    }
}

impl<I: XskIo> Datapath<I> {
    /// 빌더를 생성합니다.
    pub fn builder(umem: Umem, rings: DatapathRings, io: I) -> DatapathBuilder<I> {
        DatapathBuilder {
            umem,
            rings,
            io,
            counters: None,
            options: DatapathOptions::default(),
            rewrite: MacRewrite::default(),
        }
    }

    /// 공유 카운터
    pub fn counters(&self) -> &Arc<DatapathCounters> {
        &self.counters
    }

    /// 프레임 아레나
    pub fn umem(&self) -> &Umem {
        &self.umem
    }

    /// 완료를 기다리는 송신 수
    pub fn outstanding_tx(&self) -> u32 {
        self.outstanding_tx
    }

    /// 동작 옵션
    pub fn options(&self) -> &DatapathOptions {
        &self.options
    }

    /// 취소될 때까지 패킷을 처리합니다.
    ///
    /// 취소는 배치마다 확인하며, poll 모드 대기는 `poll_timeout`으로 제한됩니다.
    /// 처리 중인 배치는 끝까지 마칩니다.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<DatapathSnapshot, DatapathError> {
        info!(
            poll_mode = self.options.poll_mode,
            batch_size = self.options.batch_size,
            need_wakeup = self.options.need_wakeup,
            "datapath started"
        );

        while !cancel.is_cancelled() {
            if self.options.poll_mode {
                let ready = self.io.wait(self.options.poll_timeout)?;
                if !ready && self.outstanding_tx == 0 {
                    continue;
                }
            }
            let outcome = self.process_batch()?;
            if outcome.received == 0 && !self.options.poll_mode {
                std::hint::spin_loop();
            }
        }

        let snapshot = self.counters.snapshot();
        info!(
            rx_packets = snapshot.rx_packets,
            tx_packets = snapshot.tx_packets,
            backpressure_drops = snapshot.backpressure_drops,
            outstanding_tx = self.outstanding_tx,
            "datapath stopped"
        );
        Ok(snapshot)
    }

    /// 한 배치를 처리합니다.
    ///
    /// # 에러
    /// 프레임 소유권 위반(`DatapathError::FrameState`)이나 wakeup 실패는 치명적입니다.
    pub fn process_batch(&mut self) -> Result<BatchOutcome, DatapathError> {
        let mut outcome = BatchOutcome {
            completed: self.reap_completions()?,
            ..BatchOutcome::default()
        };

        let (received, first) = self.rings.rx.peek(self.options.batch_size);
        if received == 0 {
            self.refill();
            if self.options.need_wakeup && self.rings.fill.needs_wakeup() {
                self.io.wake_rx()?;
            }
            return Ok(outcome);
        }
        outcome.received = received;

        let mut queued = 0u32;
        for i in 0..received {
            let desc = self.rings.rx.read(first.wrapping_add(i));
            match self.handle(desc)? {
                Disposition::Forwarded => {
                    outcome.forwarded += 1;
                    queued += 1;
                }
                Disposition::Dropped => outcome.dropped += 1,
                Disposition::Invalid => outcome.invalid += 1,
            }
        }
        self.rings.rx.release(received);

        if queued > 0 {
            self.rings.tx.submit(queued);
            self.outstanding_tx += queued;
        }
        self.refill();
        if queued > 0 && (!self.options.need_wakeup || self.rings.tx.needs_wakeup()) {
            self.io.kick_tx()?;
        }

        trace!(
            received = outcome.received,
            forwarded = outcome.forwarded,
            dropped = outcome.dropped,
            completed = outcome.completed,
            "batch processed"
        );
        Ok(outcome)
    }

    fn handle(&mut self, desc: XdpDesc) -> Result<Disposition, DatapathError> {
        let frame = match self.umem.receive(desc.addr) {
            Ok(frame) => frame,
            Err(e @ DatapathError::AddressOutOfRange { .. }) => {
                self.counters.record_invalid();
                warn!(addr = desc.addr, len = desc.len, error = %e, "invalid rx descriptor");
                return Ok(Disposition::Invalid);
            }
            Err(e) => return Err(e),
        };

        let inspection = match self.umem.data(desc.addr, desc.len) {
            Ok(data) => parse::inspect(data),
            Err(e) => {
                self.counters.record_invalid();
                warn!(addr = desc.addr, len = desc.len, error = %e, "rx descriptor overruns frame");
                self.umem.release(frame)?;
                return Ok(Disposition::Invalid);
            }
        };
        self.counters.record_rx(desc.len);
        match inspection {
            Inspection::Payload { offset, .. } => {
                self.counters.record_inspected(desc.len as usize - offset);
            }
            Inspection::Passthrough(reason) => {
                self.counters.record_passthrough();
                trace!(frame, len = desc.len, ?reason, "forwarding uninspected");
            }
        }

        let Some(slot) = self.rings.tx.reserve(1) else {
            self.umem.release(frame)?;
            self.counters.record_backpressure_drop();
            return Ok(Disposition::Dropped);
        };

        if self.rewrite.is_active() && desc.len as usize >= ETH_HLEN {
            let data = self.umem.data_mut(desc.addr, desc.len)?;
            self.rewrite.apply(data);
        }
        self.rings.tx.write(
            slot,
            XdpDesc {
                addr: desc.addr,
                len: desc.len,
                options: 0,
            },
        );
        self.umem.transmit(frame)?;
        self.counters.record_tx(desc.len);
        Ok(Disposition::Forwarded)
    }

    /// 송신 완료된 프레임을 회수합니다.
    fn reap_completions(&mut self) -> Result<u32, DatapathError> {
        if self.outstanding_tx == 0 {
            return Ok(0);
        }
        if self.options.need_wakeup && self.rings.tx.needs_wakeup() {
            self.io.kick_tx()?;
        }

        let (n, first) = self.rings.comp.peek(self.outstanding_tx);
        for i in 0..n {
            let addr = self.rings.comp.read(first.wrapping_add(i));
            self.umem.complete(addr)?;
        }
        if n > 0 {
            self.rings.comp.release(n);
            self.outstanding_tx -= n;
        }
        Ok(n)
    }

    /// free 프레임으로 fill 링을 채우고 채운 수를 반환합니다.
    fn refill(&mut self) -> u32 {
        let available = self.umem.available() as u32;
        if available == 0 {
            return 0;
        }
        let n = self.rings.fill.free_entries(available).min(available);
        if n == 0 {
            return 0;
        }
        let Some(first) = self.rings.fill.reserve(n) else {
            return 0;
        };

        let mut filled = 0u32;
        while filled < n {
            let Some(addr) = self.umem.alloc_for_fill() else {
                break;
            };
            self.rings.fill.write(first.wrapping_add(filled), addr);
            filled += 1;
        }
        self.rings.fill.cancel(n - filled);
        self.rings.fill.submit(filled);
        filled
    }
}
