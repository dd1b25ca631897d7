//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `xids_`
//! - 단계명: `dfa_`, `table_`, `datapath_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 방향 레이블 키 (rx, tx)
pub const LABEL_DIRECTION: &str = "direction";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── DFA 컴파일 메트릭 ─────────────────────────────────────────────

/// DFA: 로드된 시그니처 수 (gauge)
pub const DFA_SIGNATURES: &str = "xids_dfa_signatures";

/// DFA: 오토마톤 상태 수 (gauge)
pub const DFA_STATES: &str = "xids_dfa_states";

/// DFA: 컴파일 소요 시간 (histogram, 초)
pub const DFA_COMPILE_DURATION_SECONDS: &str = "xids_dfa_compile_duration_seconds";

// ─── 테이블 프로비저닝 메트릭 ──────────────────────────────────────

/// 테이블: 기록된 엔트리 수 (counter, label: result)
pub const TABLE_ENTRIES_TOTAL: &str = "xids_table_entries_total";

// ─── 데이터패스 메트릭 ─────────────────────────────────────────────

/// 데이터패스: 패킷 수 (counter, label: direction)
pub const DATAPATH_PACKETS_TOTAL: &str = "xids_datapath_packets_total";

/// 데이터패스: 바이트 수 (counter, label: direction)
pub const DATAPATH_BYTES_TOTAL: &str = "xids_datapath_bytes_total";

/// 데이터패스: 송신 링 포화로 드롭된 패킷 수 (counter)
pub const DATAPATH_BACKPRESSURE_DROPS_TOTAL: &str = "xids_datapath_backpressure_drops_total";

/// 데이터패스: 헤더 검사 없이 전달된 패킷 수 (counter)
pub const DATAPATH_PASSTHROUGH_TOTAL: &str = "xids_datapath_passthrough_total";

/// 데이터패스: 초당 패킷 수 (gauge, label: direction)
pub const DATAPATH_PACKETS_PER_SECOND: &str = "xids_datapath_packets_per_second";

/// 데이터패스: 초당 비트 수 (gauge, label: direction)
pub const DATAPATH_BITS_PER_SECOND: &str = "xids_datapath_bits_per_second";

// ─── 히스토그램 버킷 ───────────────────────────────────────────────

/// 컴파일 소요 시간 버킷 (초)
pub const COMPILE_DURATION_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 이후 한 번 호출합니다. recorder가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_gauge!(DFA_SIGNATURES, "Number of distinct signatures compiled");
    describe_gauge!(DFA_STATES, "Number of states in the compiled automaton");
    describe_histogram!(
        DFA_COMPILE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent compiling signatures into the automaton"
    );

    describe_counter!(
        TABLE_ENTRIES_TOTAL,
        "Table entries written to the kernel map, by result"
    );

    describe_counter!(
        DATAPATH_PACKETS_TOTAL,
        "Packets received (rx) and forwarded (tx) by the datapath"
    );
    describe_counter!(
        DATAPATH_BYTES_TOTAL,
        metrics::Unit::Bytes,
        "Bytes received (rx) and forwarded (tx) by the datapath"
    );
    describe_counter!(
        DATAPATH_BACKPRESSURE_DROPS_TOTAL,
        "Packets dropped because no transmit descriptor was free"
    );
    describe_counter!(
        DATAPATH_PASSTHROUGH_TOTAL,
        "Packets forwarded without payload inspection"
    );
    describe_gauge!(
        DATAPATH_PACKETS_PER_SECOND,
        "Current packet rate (packets/sec)"
    );
    describe_gauge!(DATAPATH_BITS_PER_SECOND, "Current throughput rate (bits/sec)");
}
