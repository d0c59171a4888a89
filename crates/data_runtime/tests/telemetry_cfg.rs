use data_runtime::configs::telemetry::load_default;
use serial_test::serial;

#[test]
#[serial]
fn env_overrides_parse() {
    unsafe {
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("JSON_LOGS", "true");
    }
    let cfg = load_default();
    unsafe {
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("JSON_LOGS");
    }
    let cfg = cfg.expect("load");
    assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    assert_eq!(cfg.json_logs, Some(true));
}
