use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.cache.default_stale_seconds = Some(120);

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        cache_stale_seconds: Some(5),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.default_stale_after, Duration::from_secs(5));
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.api.base_url.as_str(), DEFAULT_API_BASE_URL);
    assert_eq!(settings.api.timeout, Duration::from_secs(15));
    assert!(settings.api.bearer_token.is_none());
    assert_eq!(settings.cache.default_evict_after, Duration::from_secs(300));
    assert_eq!(settings.cache.search_debounce, Duration::from_millis(300));
    assert_eq!(settings.cache.event_queue_limit.get(), 1024);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn base_url_gains_trailing_slash() {
    let mut raw = RawSettings::default();
    raw.api.base_url = Some("https://exams.example.edu/api/v2".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.api.base_url.as_str(),
        "https://exams.example.edu/api/v2/"
    );
}

#[test]
fn base_url_must_be_http() {
    let mut raw = RawSettings::default();
    raw.api.base_url = Some("ftp://exams.example.edu/".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp is rejected");
    assert!(matches!(err, LoadError::Invalid { key: "api.base_url", .. }));
}

#[test]
fn blank_token_is_ignored() {
    let mut raw = RawSettings::default();
    raw.api.bearer_token = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.api.bearer_token.is_none());
}

#[test]
fn zero_windows_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.sweep_interval_ms = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero sweep interval");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.sweep_interval_ms",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.event_queue_limit = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero queue limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.event_queue_limit",
            ..
        }
    ));
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    let err = Settings::from_raw(raw).expect_err("unknown level");
    assert!(matches!(err, LoadError::Invalid { key: "logging.level", .. }));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn parse_list_arguments() {
    let args = CliArgs::parse_from([
        "examdash",
        "list",
        "students",
        "--search",
        "sv02",
        "--fields",
        "studentCode,fullName",
        "--log-level",
        "warn",
    ]);

    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
    match args.command {
        Command::List(list) => {
            assert_eq!(list.resource, "students");
            assert_eq!(list.search.as_deref(), Some("sv02"));
            assert_eq!(list.fields, vec!["studentCode", "fullName"]);
        }
        Command::Resources => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_resources_command() {
    let args = CliArgs::parse_from(["examdash", "resources"]);
    assert!(matches!(args.command, Command::Resources));
    assert!(args.config_file.is_none());
}
