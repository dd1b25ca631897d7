//! 설정 관리 — xids.toml 파싱 및 런타임 설정
//!
//! [`XidsConfig`]는 모든 단계의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선, 데몬에서 적용)
//! 2. 환경변수 (`XIDS_INTERFACE_DEVICE=eth0` 형식)
//! 3. 설정 파일 (`xids.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), xids_core::error::XidsError> {
//! use xids_core::config::XidsConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = XidsConfig::load("xids.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = XidsConfig::parse("[interface]\ndevice = \"eth0\"")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, XidsError};

/// xids 통합 설정
///
/// `xids.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XidsConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 시그니처 파일 설정
    #[serde(default)]
    pub signatures: SignaturesConfig,
    /// 네트워크 인터페이스 설정
    #[serde(default)]
    pub interface: InterfaceConfig,
    /// DFA 테이블(커널 맵) 설정
    #[serde(default)]
    pub table: TableConfig,
    /// AF_XDP 데이터패스 설정
    #[serde(default)]
    pub datapath: DatapathConfig,
    /// 통계 샘플러 설정
    #[serde(default)]
    pub stats: StatsConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl XidsConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, XidsError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, XidsError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                XidsError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                XidsError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, XidsError> {
        toml::from_str(toml_str).map_err(|e| {
            XidsError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `XIDS_{SECTION}_{FIELD}`
    /// 예: `XIDS_INTERFACE_DEVICE=eth0`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "XIDS_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "XIDS_GENERAL_LOG_FORMAT");
        override_parsed(&mut self.general.verbose, "XIDS_GENERAL_VERBOSE");

        // Signatures
        override_path(&mut self.signatures.path, "XIDS_SIGNATURES_PATH");

        // Interface
        override_string(&mut self.interface.device, "XIDS_INTERFACE_DEVICE");
        override_parsed(&mut self.interface.queue, "XIDS_INTERFACE_QUEUE");
        override_parsed(&mut self.interface.poll_mode, "XIDS_INTERFACE_POLL_MODE");
        override_string(
            &mut self.interface.redirect_device,
            "XIDS_INTERFACE_REDIRECT_DEVICE",
        );
        override_path(
            &mut self.interface.pin_base_dir,
            "XIDS_INTERFACE_PIN_BASE_DIR",
        );
        override_string(&mut self.interface.src_mac, "XIDS_INTERFACE_SRC_MAC");
        override_string(&mut self.interface.dest_mac, "XIDS_INTERFACE_DEST_MAC");
        override_parsed(&mut self.interface.bind_mode, "XIDS_INTERFACE_BIND_MODE");
        override_parsed(
            &mut self.interface.need_wakeup,
            "XIDS_INTERFACE_NEED_WAKEUP",
        );

        // Table
        override_string(&mut self.table.map_name, "XIDS_TABLE_MAP_NAME");
        override_string(
            &mut self.table.socket_map_name,
            "XIDS_TABLE_SOCKET_MAP_NAME",
        );
        override_parsed(&mut self.table.layout, "XIDS_TABLE_LAYOUT");
        override_parsed(
            &mut self.table.provision_policy,
            "XIDS_TABLE_PROVISION_POLICY",
        );

        // Datapath
        override_parsed(&mut self.datapath.frame_count, "XIDS_DATAPATH_FRAME_COUNT");
        override_parsed(&mut self.datapath.frame_size, "XIDS_DATAPATH_FRAME_SIZE");
        override_parsed(
            &mut self.datapath.rx_ring_size,
            "XIDS_DATAPATH_RX_RING_SIZE",
        );
        override_parsed(
            &mut self.datapath.tx_ring_size,
            "XIDS_DATAPATH_TX_RING_SIZE",
        );
        override_parsed(
            &mut self.datapath.fill_ring_size,
            "XIDS_DATAPATH_FILL_RING_SIZE",
        );
        override_parsed(
            &mut self.datapath.comp_ring_size,
            "XIDS_DATAPATH_COMP_RING_SIZE",
        );
        override_parsed(&mut self.datapath.batch_size, "XIDS_DATAPATH_BATCH_SIZE");
        override_parsed(
            &mut self.datapath.poll_timeout_ms,
            "XIDS_DATAPATH_POLL_TIMEOUT_MS",
        );

        // Stats
        override_parsed(&mut self.stats.interval_secs, "XIDS_STATS_INTERVAL_SECS");

        // Metrics
        override_parsed(&mut self.metrics.enabled, "XIDS_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "XIDS_METRICS_LISTEN_ADDR");
        override_parsed(&mut self.metrics.port, "XIDS_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 인터페이스 이름은 검사하지 않습니다. 커널에 접근하는 실행 모드에서는
    /// [`validate_interface()`](Self::validate_interface)를 추가로 호출합니다.
    pub fn validate(&self) -> Result<(), XidsError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.signatures.path.as_os_str().is_empty() {
            return Err(invalid("signatures.path", "must not be empty"));
        }

        // MAC 주소 형식 검증 (빈 값은 미설정)
        for (field, value) in [
            ("interface.src_mac", &self.interface.src_mac),
            ("interface.dest_mac", &self.interface.dest_mac),
        ] {
            if !value.is_empty() && parse_mac(value).is_none() {
                return Err(invalid(field, "expected format aa:bb:cc:dd:ee:ff"));
            }
        }

        let dp = &self.datapath;
        for (field, size) in [
            ("datapath.rx_ring_size", dp.rx_ring_size),
            ("datapath.tx_ring_size", dp.tx_ring_size),
            ("datapath.fill_ring_size", dp.fill_ring_size),
            ("datapath.comp_ring_size", dp.comp_ring_size),
        ] {
            if !size.is_power_of_two() {
                return Err(invalid(field, "must be a non-zero power of two"));
            }
        }

        // AF_XDP aligned 모드는 2048 또는 4096 바이트 청크만 허용
        if dp.frame_size != 2048 && dp.frame_size != 4096 {
            return Err(invalid("datapath.frame_size", "must be 2048 or 4096"));
        }

        if dp.frame_count == 0 {
            return Err(invalid("datapath.frame_count", "must be greater than 0"));
        }

        if dp.batch_size == 0 || dp.batch_size > dp.rx_ring_size {
            return Err(invalid(
                "datapath.batch_size",
                format!("must be between 1 and rx_ring_size ({})", dp.rx_ring_size),
            ));
        }

        if dp.poll_timeout_ms == 0 {
            return Err(invalid(
                "datapath.poll_timeout_ms",
                "must be greater than 0 so shutdown stays bounded",
            ));
        }

        if self.stats.interval_secs == 0 {
            return Err(invalid("stats.interval_secs", "must be greater than 0"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be 0"));
        }

        Ok(())
    }

    /// 커널 접근이 필요한 실행 모드에서 인터페이스 설정을 검증합니다.
    pub fn validate_interface(&self) -> Result<(), XidsError> {
        if self.interface.device.is_empty() {
            let reason = if self.interface.redirect_device.is_empty() {
                "required option --dev missing"
            } else {
                "required option --dev missing (redirect device is set)"
            };
            return Err(invalid("interface.device", reason));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> XidsError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 통계 샘플러 스레드 활성화
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            verbose: false,
        }
    }
}

/// 시그니처 파일 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignaturesConfig {
    /// 줄 단위 시그니처 파일 경로
    pub path: PathBuf,
}

impl Default for SignaturesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./patterns/patterns.txt"),
        }
    }
}

/// 네트워크 인터페이스 설정
///
/// 시작 이후 변경되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// 수신 인터페이스 이름
    pub device: String,
    /// AF_XDP 수신 큐 번호
    pub queue: u32,
    /// `poll()` 대기 사용 여부 (false면 busy-poll)
    pub poll_mode: bool,
    /// 리다이렉트 대상 인터페이스 (빈 값이면 미사용)
    pub redirect_device: String,
    /// BPF 맵 고정 디렉토리의 상위 경로
    pub pin_base_dir: PathBuf,
    /// 재작성할 출발지 MAC (빈 값이면 미사용)
    pub src_mac: String,
    /// 재작성할 목적지 MAC (빈 값이면 미사용)
    pub dest_mac: String,
    /// AF_XDP 바인드 모드
    pub bind_mode: BindMode,
    /// XDP_USE_NEED_WAKEUP 플래그 사용 여부
    pub need_wakeup: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            queue: 0,
            poll_mode: false,
            redirect_device: String::new(),
            pin_base_dir: PathBuf::from("/sys/fs/bpf"),
            src_mac: String::new(),
            dest_mac: String::new(),
            bind_mode: BindMode::Auto,
            need_wakeup: true,
        }
    }
}

impl InterfaceConfig {
    /// 인터페이스별 맵 고정 디렉토리 (`<pin_base_dir>/<device>`)
    pub fn pin_dir(&self) -> PathBuf {
        self.pin_base_dir.join(&self.device)
    }
}

/// AF_XDP 바인드 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindMode {
    /// 커널이 결정 (zero-copy 가능 시 사용)
    #[default]
    Auto,
    /// XDP_COPY 강제
    Copy,
    /// XDP_ZEROCOPY 강제
    Zerocopy,
}

/// DFA 테이블 직렬화 레이아웃
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableLayout {
    /// 모든 (상태, 바이트) 쌍을 기록
    #[default]
    Dense,
    /// 시작 상태로 돌아가는 비수락 전이를 생략 (없는 키 = 시작 상태로 해석하는 소비자용)
    ElideRoot,
}

/// 프로비저닝 실패 처리 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionPolicy {
    /// 첫 번째 실패에서 중단
    #[default]
    StopOnFirstError,
    /// 실패를 기록하고 나머지 엔트리를 계속 기록
    Continue,
}

/// DFA 테이블(커널 맵) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// DFA 전이 테이블 맵 이름
    pub map_name: String,
    /// XSK 소켓 맵 이름
    pub socket_map_name: String,
    /// 직렬화 레이아웃
    pub layout: TableLayout,
    /// 프로비저닝 실패 정책
    pub provision_policy: ProvisionPolicy,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            map_name: "ids_inspect_map".to_owned(),
            socket_map_name: "xsks_map".to_owned(),
            layout: TableLayout::Dense,
            provision_policy: ProvisionPolicy::StopOnFirstError,
        }
    }
}

/// AF_XDP 데이터패스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// UMEM 프레임 수
    pub frame_count: u32,
    /// UMEM 프레임 크기 (바이트)
    pub frame_size: u32,
    /// 수신 링 크기
    pub rx_ring_size: u32,
    /// 송신 링 크기
    pub tx_ring_size: u32,
    /// fill 링 크기
    pub fill_ring_size: u32,
    /// completion 링 크기
    pub comp_ring_size: u32,
    /// 한 번에 처리할 최대 수신 디스크립터 수
    pub batch_size: u32,
    /// poll 모드 대기 타임아웃 (밀리초, 종료 지연 상한)
    pub poll_timeout_ms: u64,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            frame_count: 4096,
            frame_size: 4096,
            rx_ring_size: 2048,
            tx_ring_size: 2048,
            fill_ring_size: 2048,
            comp_ring_size: 2048,
            batch_size: 64,
            poll_timeout_ms: 1000,
        }
    }
}

/// 통계 샘플러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// 샘플링 주기 (초)
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 2 }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 익스포터 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 문자열 파싱 실패
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl FromStr for BindMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "copy" => Ok(Self::Copy),
            "zerocopy" => Ok(Self::Zerocopy),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl FromStr for TableLayout {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(Self::Dense),
            "elide-root" => Ok(Self::ElideRoot),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

impl FromStr for ProvisionPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop-on-first-error" => Ok(Self::StopOnFirstError),
            "continue" => Ok(Self::Continue),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// `aa:bb:cc:dd:ee:ff` 형식의 MAC 주소를 파싱합니다.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_path(target: &mut PathBuf, env_key: &str) {
    if let Some(val) = std::env::var_os(env_key) {
        *target = PathBuf::from(val);
    }
}

fn override_parsed<T>(target: &mut T, env_key: &str)
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(e) => warn!(
                env_key,
                value = val.as_str(),
                error = %e,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = XidsConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert!(!config.general.verbose);
        assert!(config.interface.device.is_empty());
        assert_eq!(config.interface.queue, 0);
        assert_eq!(config.table.map_name, "ids_inspect_map");
        assert_eq!(config.table.socket_map_name, "xsks_map");
        assert_eq!(config.table.provision_policy, ProvisionPolicy::StopOnFirstError);
        assert_eq!(config.datapath.batch_size, 64);
    }

    #[test]
    fn default_config_passes_validation() {
        let config = XidsConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn default_config_requires_device() {
        let config = XidsConfig::default();
        let err = config.validate_interface().unwrap_err();
        assert!(err.to_string().contains("--dev"));
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[interface]
device = "ens3"
poll_mode = true

[table]
provision_policy = "continue"
layout = "elide-root"
"#;
        let config = XidsConfig::parse(toml).unwrap();
        assert_eq!(config.interface.device, "ens3");
        assert!(config.interface.poll_mode);
        assert_eq!(config.table.provision_policy, ProvisionPolicy::Continue);
        assert_eq!(config.table.layout, TableLayout::ElideRoot);
        // 나머지는 기본값 유지
        assert_eq!(config.datapath.frame_size, 4096);
        config.validate_interface().unwrap();
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = XidsConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            XidsError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn from_str_unknown_enum_variant_is_parse_error() {
        let err = XidsConfig::parse("[interface]\nbind_mode = \"turbo\"").unwrap_err();
        assert!(matches!(
            err,
            XidsError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = XidsConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_non_power_of_two_ring() {
        let mut config = XidsConfig::default();
        config.datapath.tx_ring_size = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tx_ring_size"));
    }

    #[test]
    fn validate_rejects_unaligned_frame_size() {
        let mut config = XidsConfig::default();
        config.datapath.frame_size = 3000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("frame_size"));
    }

    #[test]
    fn validate_rejects_batch_larger_than_rx_ring() {
        let mut config = XidsConfig::default();
        config.datapath.rx_ring_size = 32;
        config.datapath.batch_size = 64;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn validate_rejects_malformed_mac() {
        let mut config = XidsConfig::default();
        config.interface.dest_mac = "00:11:22:33:44".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dest_mac"));
    }

    #[test]
    fn validate_rejects_zero_poll_timeout() {
        let mut config = XidsConfig::default();
        config.datapath.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_mac_accepts_valid_and_rejects_invalid() {
        assert_eq!(
            parse_mac("00:1a:2B:3c:4d:ff"),
            Some([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0xff])
        );
        assert_eq!(parse_mac("00:1a:2b:3c:4d"), None);
        assert_eq!(parse_mac("00:1a:2b:3c:4d:ff:00"), None);
        assert_eq!(parse_mac("0:1a:2b:3c:4d:ff"), None);
        assert_eq!(parse_mac("zz:1a:2b:3c:4d:ff"), None);
    }

    #[test]
    fn pin_dir_joins_device() {
        let mut config = XidsConfig::default();
        config.interface.device = "eth1".to_owned();
        assert_eq!(config.interface.pin_dir(), PathBuf::from("/sys/fs/bpf/eth1"));
    }

    #[test]
    #[serial]
    fn env_override_parsed_values() {
        let mut config = XidsConfig::default();
        // SAFETY: serial 테스트이므로 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe {
            std::env::set_var("XIDS_INTERFACE_DEVICE", "veth0");
            std::env::set_var("XIDS_INTERFACE_QUEUE", "3");
            std::env::set_var("XIDS_TABLE_PROVISION_POLICY", "continue");
        }
        config.apply_env_overrides();
        assert_eq!(config.interface.device, "veth0");
        assert_eq!(config.interface.queue, 3);
        assert_eq!(config.table.provision_policy, ProvisionPolicy::Continue);
        unsafe {
            std::env::remove_var("XIDS_INTERFACE_DEVICE");
            std::env::remove_var("XIDS_INTERFACE_QUEUE");
            std::env::remove_var("XIDS_TABLE_PROVISION_POLICY");
        }
    }

    #[test]
    #[serial]
    fn env_override_invalid_value_keeps_original() {
        let mut config = XidsConfig::default();
        // SAFETY: serial 테스트이므로 다른 스레드가 환경변수를 읽지 않습니다.
        unsafe { std::env::set_var("XIDS_DATAPATH_BATCH_SIZE", "many") };
        config.apply_env_overrides();
        assert_eq!(config.datapath.batch_size, 64);
        unsafe { std::env::remove_var("XIDS_DATAPATH_BATCH_SIZE") };
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = XidsConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = XidsConfig::parse(&toml_str).unwrap();
        assert_eq!(config.table.map_name, parsed.table.map_name);
        assert_eq!(config.interface.bind_mode, parsed.interface.bind_mode);
        assert_eq!(config.datapath.frame_count, parsed.datapath.frame_count);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = XidsConfig::from_file("/nonexistent/path/xids.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            XidsError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
