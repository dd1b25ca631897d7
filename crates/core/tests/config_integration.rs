//! xids.toml 통합 설정 테스트
//!
//! - xids.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use xids_core::config::{BindMode, ProvisionPolicy, TableLayout, XidsConfig};
use xids_core::error::{ConfigError, XidsError};

// =============================================================================
// xids.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let content = include_str!("../../../xids.toml.example");
    let config = XidsConfig::parse(content).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.interface.pin_base_dir.to_str(), Some("/sys/fs/bpf"));
    assert_eq!(config.table.map_name, "ids_inspect_map");
    assert_eq!(config.table.socket_map_name, "xsks_map");
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../xids.toml.example");
    let from_file = XidsConfig::parse(content).expect("should parse");
    let from_code = XidsConfig::default();

    assert_eq!(from_file.general.log_level, from_code.general.log_level);
    assert_eq!(from_file.general.verbose, from_code.general.verbose);
    assert_eq!(from_file.signatures.path, from_code.signatures.path);

    assert_eq!(from_file.interface.device, from_code.interface.device);
    assert_eq!(from_file.interface.queue, from_code.interface.queue);
    assert_eq!(from_file.interface.bind_mode, from_code.interface.bind_mode);
    assert_eq!(
        from_file.interface.need_wakeup,
        from_code.interface.need_wakeup
    );

    assert_eq!(from_file.table.layout, from_code.table.layout);
    assert_eq!(
        from_file.table.provision_policy,
        from_code.table.provision_policy
    );

    assert_eq!(from_file.datapath.frame_count, from_code.datapath.frame_count);
    assert_eq!(from_file.datapath.frame_size, from_code.datapath.frame_size);
    assert_eq!(
        from_file.datapath.rx_ring_size,
        from_code.datapath.rx_ring_size
    );
    assert_eq!(from_file.datapath.batch_size, from_code.datapath.batch_size);
    assert_eq!(
        from_file.datapath.poll_timeout_ms,
        from_code.datapath.poll_timeout_ms
    );

    assert_eq!(from_file.stats.interval_secs, from_code.stats.interval_secs);
    assert_eq!(from_file.metrics.enabled, from_code.metrics.enabled);
    assert_eq!(from_file.metrics.port, from_code.metrics.port);
}

#[test]
fn example_config_does_not_name_a_device() {
    // 예제는 그대로 커널 모드에 쓸 수 없음 (--dev 필요)
    let content = include_str!("../../../xids.toml.example");
    let config = XidsConfig::parse(content).expect("should parse");
    assert!(config.validate_interface().is_err());
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_interface_only() {
    let toml = r#"
[interface]
device = "ens3"
queue = 2
bind_mode = "zerocopy"
src_mac = "02:00:00:00:00:01"
"#;
    let config = XidsConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");
    config.validate_interface().expect("device is set");

    assert_eq!(config.interface.device, "ens3");
    assert_eq!(config.interface.queue, 2);
    assert_eq!(config.interface.bind_mode, BindMode::Zerocopy);
    assert_eq!(config.interface.pin_dir().to_str(), Some("/sys/fs/bpf/ens3"));
    // 나머지 섹션은 기본값
    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.datapath.batch_size, 64);
}

#[test]
fn partial_config_table_only() {
    let toml = r#"
[table]
layout = "elide-root"
provision_policy = "continue"
"#;
    let config = XidsConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.table.layout, TableLayout::ElideRoot);
    assert_eq!(config.table.provision_policy, ProvisionPolicy::Continue);
    assert_eq!(config.table.map_name, "ids_inspect_map");
}

#[test]
fn partial_config_datapath_only() {
    let toml = r#"
[datapath]
frame_size = 2048
rx_ring_size = 512
batch_size = 512
"#;
    let config = XidsConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.datapath.frame_size, 2048);
    assert_eq!(config.datapath.rx_ring_size, 512);
    assert_eq!(config.datapath.tx_ring_size, 2048);
}

// =============================================================================
// 환경변수 오버라이드 테스트
// =============================================================================

/// 환경변수를 설정한 상태에서 `f`를 실행하고 원래 값을 복원합니다.
fn with_env<R>(key: &str, value: &str, f: impl FnOnce() -> R) -> R {
    let original = std::env::var(key).ok();
    // SAFETY: 테스트는 serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var(key, value);
    }

    let result = f();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[interface]
device = "eth0"
"#;
    let device = with_env("XIDS_INTERFACE_DEVICE", "eth1", || {
        let mut config = XidsConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.interface.device
    });
    assert_eq!(device, "eth1");
}

#[test]
#[serial_test::serial]
fn env_override_enum_field() {
    let layout = with_env("XIDS_TABLE_LAYOUT", "elide-root", || {
        let mut config = XidsConfig::default();
        config.apply_env_overrides();
        config.table.layout
    });
    assert_eq!(layout, TableLayout::ElideRoot);
}

#[test]
#[serial_test::serial]
fn env_override_bool_and_numeric_fields() {
    let (poll_mode, timeout) = with_env("XIDS_INTERFACE_POLL_MODE", "true", || {
        with_env("XIDS_DATAPATH_POLL_TIMEOUT_MS", "250", || {
            let mut config = XidsConfig::default();
            config.apply_env_overrides();
            (config.interface.poll_mode, config.datapath.poll_timeout_ms)
        })
    });
    assert!(poll_mode);
    assert_eq!(timeout, 250);
}

#[test]
#[serial_test::serial]
fn env_override_unparsable_value_is_ignored() {
    let toml = r#"
[datapath]
batch_size = 32
"#;
    let batch_size = with_env("XIDS_DATAPATH_BATCH_SIZE", "lots", || {
        let mut config = XidsConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.datapath.batch_size
    });
    assert_eq!(batch_size, 32);
}

// =============================================================================
// 에러 처리 테스트
// =============================================================================

#[test]
fn empty_file_yields_defaults() {
    let config = XidsConfig::parse("").expect("empty config should parse");
    config.validate().expect("defaults should validate");
    assert_eq!(config.general.log_format, "json");
}

#[test]
fn invalid_toml_syntax() {
    let result = XidsConfig::parse("[interface\ndevice = ");
    assert!(matches!(
        result.unwrap_err(),
        XidsError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn unknown_enum_variant_is_a_parse_error() {
    let toml = r#"
[interface]
bind_mode = "turbo"
"#;
    assert!(matches!(
        XidsConfig::parse(toml).unwrap_err(),
        XidsError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_numeric_field() {
    let toml = r#"
[datapath]
batch_size = "sixty-four"
"#;
    assert!(matches!(
        XidsConfig::parse(toml).unwrap_err(),
        XidsError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn invalid_values_fail_validation() {
    let cases = [
        "[datapath]\nrx_ring_size = 1000\n",
        "[datapath]\nframe_size = 1500\n",
        "[datapath]\nbatch_size = 0\n",
        "[datapath]\npoll_timeout_ms = 0\n",
        "[interface]\ndest_mac = \"zz:00:00:00:00:00\"\n",
        "[general]\nlog_level = \"loud\"\n",
    ];
    for toml in cases {
        let config = XidsConfig::parse(toml).expect("should parse");
        assert!(
            matches!(
                config.validate(),
                Err(XidsError::Config(ConfigError::InvalidValue { .. }))
            ),
            "expected validation failure for {toml:?}"
        );
    }
}

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let result = XidsConfig::from_file("/tmp/xids_test_nonexistent_12345.toml").await;
    assert!(matches!(
        result.unwrap_err(),
        XidsError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn load_from_disk_applies_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xids.toml");
    tokio::fs::write(&path, "[stats]\ninterval_secs = 0\n")
        .await
        .unwrap();

    let result = XidsConfig::load(&path).await;
    assert!(matches!(
        result.unwrap_err(),
        XidsError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// 직렬화 라운드트립 테스트
// =============================================================================

#[test]
fn example_config_serialize_roundtrip() {
    let content = include_str!("../../../xids.toml.example");
    let config = XidsConfig::parse(content).expect("should parse");
    let serialized = toml::to_string_pretty(&config).expect("should serialize");
    let reparsed = XidsConfig::parse(&serialized).expect("should reparse");
    reparsed.validate().expect("should validate");

    assert_eq!(config.table.layout, reparsed.table.layout);
    assert_eq!(config.datapath.comp_ring_size, reparsed.datapath.comp_ring_size);
}
