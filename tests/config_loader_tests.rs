use hookwatch::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
    time::Duration,
};
use tempfile::TempDir;

const VARS: &[&str] = &[
    "HOOKWATCH_PROFILE",
    "HOOKWATCH_API_BIND_ADDR",
    "HOOKWATCH_LOG_LEVEL",
    "HOOKWATCH_OPERATOR_TOKEN",
    "HOOKWATCH_OPERATOR_TOKENS",
    "HOOKWATCH_CHECKER_INTERVAL_SECONDS",
    "HOOKWATCH_CHECKER_INITIAL_DELAY_SECONDS",
    "HOOKWATCH_CHECKER_ENABLED",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert!(cfg.operator_tokens.is_empty());
    assert!(cfg.checker.enabled);
    assert_eq!(cfg.checker.interval(), Duration::from_secs(3600));
    assert_eq!(cfg.checker.initial_delay(), Duration::from_secs(60));
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "HOOKWATCH_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "HOOKWATCH_API_BIND_ADDR=192.168.0.10:5000\nHOOKWATCH_CHECKER_INTERVAL_SECONDS=600\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "HOOKWATCH_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "HOOKWATCH_PROFILE=test\nHOOKWATCH_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.checker.interval_seconds, 600);
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HOOKWATCH_API_BIND_ADDR=127.0.0.1:3000\nHOOKWATCH_CHECKER_ENABLED=true\n",
    );

    unsafe {
        env::set_var("HOOKWATCH_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("HOOKWATCH_CHECKER_ENABLED", "false");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert!(!cfg.checker.enabled);

    clear_env();
}

#[test]
fn operator_token_list_takes_precedence_over_single_token() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HOOKWATCH_PROFILE=prod\nHOOKWATCH_OPERATOR_TOKEN=single\nHOOKWATCH_OPERATOR_TOKENS=\" first, ,second \"\n",
    );

    let cfg = loader(&temp_dir).load().expect("config loads");
    assert_eq!(cfg.profile, "prod");
    assert_eq!(cfg.operator_tokens, vec!["first", "second"]);

    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("first"));
    assert!(redacted.contains("[REDACTED]"));
}

#[test]
fn non_local_profile_requires_operator_token() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "HOOKWATCH_PROFILE=prod\n");

    let err = loader(&temp_dir)
        .load()
        .expect_err("prod without operator token should fail");
    assert!(matches!(err, ConfigError::MissingOperatorTokens));
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("HOOKWATCH_API_BIND_ADDR", "not-an-addr");
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn unparsable_checker_value_names_the_variable() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HOOKWATCH_CHECKER_INTERVAL_SECONDS=hourly\n",
    );

    let err = loader(&temp_dir).load().expect_err("bad interval should fail");
    match err {
        ConfigError::InvalidValue { key, value } => {
            assert_eq!(key, "HOOKWATCH_CHECKER_INTERVAL_SECONDS");
            assert_eq!(value, "hourly");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn out_of_range_checker_schedule_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "HOOKWATCH_CHECKER_INTERVAL_SECONDS=120\nHOOKWATCH_CHECKER_INITIAL_DELAY_SECONDS=300\n",
    );

    let err = loader(&temp_dir).load().expect_err("delay beyond interval should fail");
    assert!(matches!(
        err,
        ConfigError::InvalidCheckerInitialDelay {
            value: 300,
            interval: 120
        }
    ));
}
