use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use traffic_gate::config::ServiceConfig;
use traffic_gate::DecisionPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRAFFIC_GATE_CONFIG",
        "TRAFFIC_GATE_ADDR",
        "TRAFFIC_GATE_DETECTOR",
        "TRAFFIC_GATE_MODEL",
        "TRAFFIC_GATE_LOGS_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(toml.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load defaults");
    assert_eq!(cfg.addr, "0.0.0.0:5000");
    assert_eq!(cfg.detector, "geometric");
    assert!(cfg.model_path.is_none());
    assert!(cfg.logs_dir.is_none());
    assert_eq!(cfg.engine.min_threshold, 4);
    assert_eq!(cfg.engine.max_threshold, 5);
    assert_eq!(cfg.engine.history_capacity, 5);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
addr = "127.0.0.1:7000"
detector = "fixed"

[recording]
logs_dir = "/var/lib/traffic-gate/logs"

[engine]
policy = "at_least"
min_threshold = 3
history_capacity = 7
min_solidity = 0.5
"#,
    );
    std::env::set_var("TRAFFIC_GATE_CONFIG", file.path());
    std::env::set_var("TRAFFIC_GATE_ADDR", "127.0.0.1:7100");
    std::env::set_var("TRAFFIC_GATE_LOGS_DIR", "/tmp/traffic-logs");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.addr, "127.0.0.1:7100");
    assert_eq!(cfg.detector, "fixed");
    assert_eq!(cfg.logs_dir, Some(PathBuf::from("/tmp/traffic-logs")));
    assert_eq!(cfg.engine.policy, DecisionPolicy::AtLeast);
    assert_eq!(cfg.engine.min_threshold, 3);
    assert_eq!(cfg.engine.history_capacity, 7);
    assert_eq!(cfg.engine.min_solidity, 0.5);
    assert_eq!(cfg.engine.min_convexity, 0.6);

    clear_env();
}

#[test]
fn rejects_invalid_engine_section() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
[engine]
min_threshold = 9
max_threshold = 2
"#,
    );
    std::env::set_var("TRAFFIC_GATE_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    let file = write_config("listen = \"0.0.0.0:1\"\n");
    std::env::set_var("TRAFFIC_GATE_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_bad_listen_address() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAFFIC_GATE_ADDR", "not-an-address");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}
