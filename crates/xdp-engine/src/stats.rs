//! 통계 수집 — 데이터패스 카운터와 주기적 샘플링
//!
//! [`DatapathCounters`]는 데이터패스 스레드가 갱신하는 relaxed 원자 카운터입니다.
//! [`StatsSampler`]는 별도 OS 스레드에서 주기적으로 스냅샷을 읽어
//! [`DatapathStats`]로 rate를 계산하고 로그/메트릭으로 내보냅니다.
//!
//! # 데이터 흐름
//! ```text
//! DatapathCounters ──snapshot──▶ DatapathSnapshot ──update──▶ DatapathStats
//! (relaxed atomics)              (누적 값)                     (rate 계산, metrics)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use xids_core::metrics as m;

/// 취소 확인 간격
const CANCEL_CHECK: Duration = Duration::from_millis(100);

/// 데이터패스 카운터
///
/// 진단 용도이므로 모든 접근은 `Relaxed`입니다.
#[derive(Debug, Default)]
pub struct DatapathCounters {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    backpressure_drops: AtomicU64,
    passthrough: AtomicU64,
    inspected_bytes: AtomicU64,
    invalid_descriptors: AtomicU64,
}

impl DatapathCounters {
    /// 제로 초기화된 카운터를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_rx(&self, len: u32) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(u64::from(len), Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self, len: u32) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(u64::from(len), Ordering::Relaxed);
    }

    pub(crate) fn record_backpressure_drop(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inspected(&self, payload_len: usize) {
        self.inspected_bytes
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid(&self) {
        self.invalid_descriptors.fetch_add(1, Ordering::Relaxed);
    }

    /// 현재 누적 값을 읽습니다.
    pub fn snapshot(&self) -> DatapathSnapshot {
        DatapathSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            inspected_bytes: self.inspected_bytes.load(Ordering::Relaxed),
            invalid_descriptors: self.invalid_descriptors.load(Ordering::Relaxed),
        }
    }
}

/// 카운터 누적 값 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatapathSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub backpressure_drops: u64,
    pub passthrough: u64,
    pub inspected_bytes: u64,
    pub invalid_descriptors: u64,
}

/// 방향별 메트릭 (누적 + 비율)
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectionMetrics {
    /// 패킷 수 (누적)
    pub packets: u64,
    /// 바이트 수 (누적)
    pub bytes: u64,
    /// 초당 패킷 수
    pub pps: f64,
    /// 초당 비트 수
    pub bps: f64,
}

/// 데이터패스 통계
///
/// # Rate 계산
/// `update()`를 호출할 때마다 이전 스냅샷과의 차이를 경과 시간으로 나누어
/// pps, bps를 계산합니다. 첫 번째 호출에서는 누적 값만 설정하고 rate는 0입니다.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatapathStats {
    /// 수신
    pub rx: DirectionMetrics,
    /// 송신 (전달)
    pub tx: DirectionMetrics,
    /// 송신 링 포화로 드롭된 패킷 수
    pub backpressure_drops: u64,
    /// 헤더 검사 없이 전달된 패킷 수
    pub passthrough: u64,
    #[serde(skip)]
    last_poll: Option<Instant>,
    #[serde(skip)]
    prev: Option<DatapathSnapshot>,
}

impl DatapathStats {
    /// 제로 초기화된 통계를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 스냅샷으로 통계를 갱신하고 메트릭을 내보냅니다.
    pub fn update(&mut self, snapshot: DatapathSnapshot) {
        self.update_at(snapshot, Instant::now());
    }

    fn update_at(&mut self, snapshot: DatapathSnapshot, now: Instant) {
        let elapsed = self
            .last_poll
            .map(|last| now.saturating_duration_since(last).as_secs_f64());

        match (self.prev, elapsed) {
            (Some(prev), Some(elapsed)) if elapsed > 0.0 => {
                Self::compute_rate(
                    &mut self.rx,
                    (snapshot.rx_packets, snapshot.rx_bytes),
                    (prev.rx_packets, prev.rx_bytes),
                    elapsed,
                );
                Self::compute_rate(
                    &mut self.tx,
                    (snapshot.tx_packets, snapshot.tx_bytes),
                    (prev.tx_packets, prev.tx_bytes),
                    elapsed,
                );
            }
            (Some(_), _) => {
                // 경과 시간 0: 누적 값만 갱신하고 이전 rate 유지
                self.rx.packets = snapshot.rx_packets;
                self.rx.bytes = snapshot.rx_bytes;
                self.tx.packets = snapshot.tx_packets;
                self.tx.bytes = snapshot.tx_bytes;
            }
            (None, _) => {
                Self::set_cumulative(&mut self.rx, snapshot.rx_packets, snapshot.rx_bytes);
                Self::set_cumulative(&mut self.tx, snapshot.tx_packets, snapshot.tx_bytes);
            }
        }
        self.backpressure_drops = snapshot.backpressure_drops;
        self.passthrough = snapshot.passthrough;

        self.prev = Some(snapshot);
        self.last_poll = Some(now);

        self.publish();
    }

    fn publish(&self) {
        for (direction, metrics) in [("rx", &self.rx), ("tx", &self.tx)] {
            metrics::counter!(m::DATAPATH_PACKETS_TOTAL, m::LABEL_DIRECTION => direction)
                .absolute(metrics.packets);
            metrics::counter!(m::DATAPATH_BYTES_TOTAL, m::LABEL_DIRECTION => direction)
                .absolute(metrics.bytes);
            metrics::gauge!(m::DATAPATH_PACKETS_PER_SECOND, m::LABEL_DIRECTION => direction)
                .set(metrics.pps);
            metrics::gauge!(m::DATAPATH_BITS_PER_SECOND, m::LABEL_DIRECTION => direction)
                .set(metrics.bps);
        }
        metrics::counter!(m::DATAPATH_BACKPRESSURE_DROPS_TOTAL).absolute(self.backpressure_drops);
        metrics::counter!(m::DATAPATH_PASSTHROUGH_TOTAL).absolute(self.passthrough);
    }

    /// 통계를 초기화합니다.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn compute_rate(
        metrics: &mut DirectionMetrics,
        (packets, bytes): (u64, u64),
        (prev_packets, prev_bytes): (u64, u64),
        elapsed_secs: f64,
    ) {
        metrics.packets = packets;
        metrics.bytes = bytes;

        let delta_packets = packets.saturating_sub(prev_packets);
        let delta_bytes = bytes.saturating_sub(prev_bytes);

        #[allow(clippy::cast_precision_loss)]
        {
            metrics.pps = delta_packets as f64 / elapsed_secs;
            metrics.bps = (delta_bytes as f64 * 8.0) / elapsed_secs;
        }
    }

    fn set_cumulative(metrics: &mut DirectionMetrics, packets: u64, bytes: u64) {
        metrics.packets = packets;
        metrics.bytes = bytes;
        metrics.pps = 0.0;
        metrics.bps = 0.0;
    }
}

/// 주기적 통계 샘플러 (별도 OS 스레드)
pub struct StatsSampler {
    handle: JoinHandle<DatapathStats>,
}

impl StatsSampler {
    /// 샘플링 스레드(`xids-stats`)를 시작합니다.
    ///
    /// `interval`마다 카운터를 읽어 요약을 `info` 로그로 남깁니다.
    /// 취소는 최대 100ms 간격으로 확인합니다.
    pub fn spawn(
        counters: Arc<DatapathCounters>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let handle = std::thread::Builder::new()
            .name("xids-stats".to_owned())
            .spawn(move || {
                let mut stats = DatapathStats::new();
                stats.update(counters.snapshot());
                debug!(interval_ms = interval.as_millis() as u64, "stats sampler started");

                while sleep_unless_cancelled(interval, &cancel) {
                    stats.update(counters.snapshot());
                    info!(
                        rx_packets = stats.rx.packets,
                        rx_pps = stats.rx.pps,
                        rx_bps = stats.rx.bps,
                        tx_packets = stats.tx.packets,
                        tx_pps = stats.tx.pps,
                        tx_bps = stats.tx.bps,
                        backpressure_drops = stats.backpressure_drops,
                        passthrough = stats.passthrough,
                        "datapath stats"
                    );
                }

                debug!("stats sampler stopped");
                stats
            })?;
        Ok(Self { handle })
    }

    /// 샘플러 스레드 종료를 기다리고 마지막 통계를 반환합니다.
    pub fn join(self) -> Option<DatapathStats> {
        self.handle.join().ok()
    }
}

/// `interval` 동안 대기합니다. 취소되면 `false`를 반환합니다.
fn sleep_unless_cancelled(interval: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(CANCEL_CHECK.min(deadline - now));
    }
}
