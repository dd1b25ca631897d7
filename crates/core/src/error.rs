//! 에러 타입 — 처리 단계별 에러 정의
//!
//! 각 단계(설정, 컴파일, 프로비저닝, 데이터패스)는 자기 에러 enum을 가지며,
//! [`XidsError`]가 이를 하나로 묶습니다. 프로세스 종료 코드는
//! [`XidsError::exit_status()`]로 결정됩니다.

/// xids 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum XidsError {
    /// 설정 관련 에러 (시그니처 파일 포함)
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// DFA 컴파일 에러
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// 커널 테이블 프로비저닝 에러
    #[error("provision error: {0}")]
    Provision(#[from] ProvisionError),

    /// 데이터패스 에러 (초기화 실패 또는 프레임 소유권 위반)
    #[error("datapath error: {0}")]
    Datapath(#[from] DatapathError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl XidsError {
    /// 에러가 발생한 단계에 대응하는 종료 상태를 반환합니다.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Config(ConfigError::SignatureFile { .. } | ConfigError::NoSignatures { .. }) => {
                ExitStatus::PatternCompile
            }
            Self::Config(_) => ExitStatus::Option,
            Self::Compile(_) => ExitStatus::PatternCompile,
            Self::Provision(_) => ExitStatus::Bpf,
            Self::Datapath(DatapathError::Interface { .. }) => ExitStatus::Attach,
            Self::Datapath(_) => ExitStatus::Bpf,
            Self::Io(_) => ExitStatus::Failure,
        }
    }
}

/// 프로세스 종료 상태
///
/// | 상태             | 코드 |
/// |------------------|------|
/// | `Ok`             | 0    |
/// | `Failure`        | 1    |
/// | `Option`         | 2    |
/// | `Attach`         | 30   |
/// | `Bpf`            | 40   |
/// | `PatternCompile` | 50   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 정상 종료
    Ok,
    /// 일반 실패
    Failure,
    /// 옵션/설정 파싱 실패
    Option,
    /// 인터페이스 조회 또는 XDP 어태치 실패
    Attach,
    /// BPF 맵 열기, 프로비저닝, AF_XDP 초기화 실패
    Bpf,
    /// 시그니처 로딩 또는 DFA 컴파일 실패
    PatternCompile,
}

impl ExitStatus {
    /// 프로세스 종료 코드
    pub const fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Failure => 1,
            Self::Option => 2,
            Self::Attach => 30,
            Self::Bpf => 40,
            Self::PatternCompile => 50,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 시그니처 파일을 읽을 수 없음
    #[error("cannot read signature file {path}: {reason}")]
    SignatureFile { path: String, reason: String },

    /// 로딩 후 남은 시그니처가 없음
    #[error("no signatures found in {path}")]
    NoSignatures { path: String },
}

/// DFA 컴파일 에러
///
/// 정상 입력에서는 발생하지 않으며, 내부 불변식 위반을 보고합니다.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// 상태 ID가 u32 범위를 초과함
    #[error("state id space exhausted while inserting signature #{signature_index}")]
    StateOverflow { signature_index: usize },

    /// 결정화 이후에도 전이가 정의되지 않은 (상태, 바이트) 쌍이 존재함
    #[error("state {state} has no transition for byte 0x{byte:02x} after determinization")]
    IncompleteTransition { state: u32, byte: u8 },
}

/// 테이블 저장소 단일 엔트리 쓰기 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 저장소가 가득 참
    #[error("store is full")]
    Full,

    /// 키 또는 값 크기가 저장소 레이아웃과 다름
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// 하위 핸들 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 커널 테이블 프로비저닝 에러
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// 고정(pinned) 맵을 열 수 없음
    #[error("failed to open pinned map {path}: {reason}")]
    MapOpen { path: String, reason: String },

    /// CPU 토폴로지를 알 수 없음 (per-CPU 복제 불가)
    #[error("failed to determine possible cpus: {reason}")]
    CpuTopology { reason: String },

    /// 엔트리 쓰기 실패 (stop-on-first-error 정책)
    #[error("failed to update entry (state {state}, unit 0x{unit:02x}): {source}")]
    Update {
        state: u32,
        unit: u8,
        #[source]
        source: StoreError,
    },

    /// 일부 엔트리 쓰기 실패 (continue 정책)
    #[error("{failed} of {total} table entries failed to provision")]
    Partial { failed: usize, total: usize },
}

/// 데이터패스 에러
///
/// 모두 치명적입니다. 전송 링 포화로 인한 드롭은 에러가 아니라 카운터로 집계됩니다.
#[derive(Debug, thiserror::Error)]
pub enum DatapathError {
    /// 네트워크 인터페이스를 찾을 수 없음
    #[error("interface {name}: {reason}")]
    Interface { name: String, reason: String },

    /// 링 또는 UMEM 초기화 실패
    #[error("setup failed at {stage}: {reason}")]
    Setup { stage: &'static str, reason: String },

    /// 프레임 소유권 상태 위반 (이중 해제 등)
    #[error("frame {frame} is {actual}, expected {expected}")]
    FrameState {
        frame: u32,
        expected: &'static str,
        actual: &'static str,
    },

    /// 디스크립터 주소가 UMEM 범위를 벗어남
    #[error("descriptor address {addr:#x} outside umem of {size} bytes")]
    AddressOutOfRange { addr: u64, size: u64 },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let all = [
            ExitStatus::Ok,
            ExitStatus::Failure,
            ExitStatus::Option,
            ExitStatus::Attach,
            ExitStatus::Bpf,
            ExitStatus::PatternCompile,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code(), "{a:?} and {b:?} share a code");
            }
        }
        assert_eq!(ExitStatus::Ok.code(), 0);
    }

    #[test]
    fn signature_errors_map_to_pattern_compile() {
        let err: XidsError = ConfigError::NoSignatures {
            path: "patterns.txt".to_owned(),
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::PatternCompile);

        let err: XidsError = ConfigError::SignatureFile {
            path: "patterns.txt".to_owned(),
            reason: "not found".to_owned(),
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::PatternCompile);
    }

    #[test]
    fn config_errors_map_to_option() {
        let err: XidsError = ConfigError::InvalidValue {
            field: "interface.device".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::Option);
    }

    #[test]
    fn provision_and_setup_errors_map_to_bpf() {
        let err: XidsError = ProvisionError::Partial {
            failed: 1,
            total: 10,
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::Bpf);

        let err: XidsError = DatapathError::Setup {
            stage: "umem",
            reason: "mmap failed".to_owned(),
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::Bpf);
    }

    #[test]
    fn interface_error_maps_to_attach() {
        let err: XidsError = DatapathError::Interface {
            name: "eth9".to_owned(),
            reason: "no such device".to_owned(),
        }
        .into();
        assert_eq!(err.exit_status(), ExitStatus::Attach);
    }

    #[test]
    fn update_error_display_includes_key() {
        let err = ProvisionError::Update {
            state: 7,
            unit: b'a',
            source: StoreError::Full,
        };
        let msg = err.to_string();
        assert!(msg.contains("state 7"));
        assert!(msg.contains("0x61"));
    }

    #[test]
    fn compile_error_display_includes_index() {
        let err = CompileError::StateOverflow { signature_index: 3 };
        assert!(err.to_string().contains("#3"));
    }
}
