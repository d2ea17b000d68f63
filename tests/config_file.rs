use std::io::Write;
use std::time::Duration;

use melsec_tags::mc_define::{FrameFormat, Transport};
use melsec_tags::{ClientConfig, ClientError};

#[test]
fn load_client_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(
        file,
        r#"
host = "192.168.8.106"
port = 1281
timeout_ms = 10000
read_pacing_ms = 20

[engine]
protocol = "TCP"
frame = "MC3E"
log_level = "INFO"
"#
    )
    .expect("write config");

    let cfg = ClientConfig::from_path(file.path()).expect("load config");
    assert_eq!(cfg.endpoint().id().as_str(), "mcprotocol:192.168.8.106:1281");
    assert_eq!(cfg.timeout(), Duration::from_secs(10));
    assert_eq!(cfg.read_pacing(), Duration::from_millis(20));
    assert_eq!(cfg.write_pacing(), Duration::from_millis(100));
    assert_eq!(cfg.engine.protocol, Some(Transport::Tcp));
    assert_eq!(cfg.engine.frame, Some(FrameFormat::MC3E));

    let opts = cfg.connect_options();
    assert_eq!(opts.connect_timeout, Some(Duration::from_secs(10)));
    assert_eq!(opts.engine.log_level.as_deref(), Some("INFO"));
}

#[test]
fn missing_and_invalid_files_are_config_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ClientConfig::from_path(&dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, ClientError::Config(_)), "{err}");

    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "host = \"plc\"\nport = 0\n").expect("write");
    let err = ClientConfig::from_path(&path).expect_err("port 0");
    assert!(err.to_string().contains("port"), "{err}");
}
