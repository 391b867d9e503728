use std::io::Write;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_track_in_production_against_postgres() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.store.backend, StoreBackend::Postgres);
    assert_eq!(settings.tracking.environment, Environment::Production);
    assert!(TrackingConfig::from(&settings.tracking).writes_enabled());
    assert_eq!(
        settings.registry.idle_timeout,
        Duration::from_secs(DEFAULT_REGISTRY_IDLE_TIMEOUT_SECS)
    );
    assert_eq!(
        settings.store.rest.timeout,
        Duration::from_millis(DEFAULT_REST_TIMEOUT_MS)
    );
}

#[test]
fn development_environment_disables_writes_without_override() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        tracking_environment: Some("development".into()),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert!(!TrackingConfig::from(&settings.tracking).writes_enabled());

    raw.apply_serve_overrides(&ServeOverrides {
        track_in_development: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(TrackingConfig::from(&settings.tracking).writes_enabled());
}

#[test]
fn rejects_unknown_backend_and_bad_rest_url() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("mongo".into());
    let err = Settings::from_raw(raw).expect_err("unknown backend");
    assert!(matches!(err, LoadError::Invalid { key: "store.backend", .. }));

    let mut raw = RawSettings::default();
    raw.rest.url = Some("not a url".into());
    let err = Settings::from_raw(raw).expect_err("bad url");
    assert!(matches!(err, LoadError::Invalid { key: "rest.url", .. }));
}

#[test]
fn rejects_zero_sweep_interval() {
    let mut raw = RawSettings::default();
    raw.registry.sweep_interval_seconds = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero interval");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "registry.sweep_interval_seconds",
            ..
        }
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn config_file_is_layered_under_cli() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tmp file");
    writeln!(
        file,
        "[store]\nbackend = \"rest\"\n\n[rest]\nurl = \"https://rows.example.com\"\napi_key = \"anon\"\n\n[server]\nport = 4100"
    )
    .expect("write config");

    let cli = CliArgs::parse_from([
        "readtrail",
        "--config-file",
        file.path().to_str().expect("utf8 path"),
        "serve",
        "--server-port",
        "4200",
    ]);
    let settings = load(&cli).expect("settings load");

    assert_eq!(settings.store.backend, StoreBackend::Rest);
    assert_eq!(
        settings.store.rest.base_url.as_ref().map(Url::as_str),
        Some("https://rows.example.com/")
    );
    assert_eq!(settings.store.rest.api_key.as_deref(), Some("anon"));
    assert_eq!(settings.server.addr.port(), 4200);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["readtrail"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_report_arguments() {
    let args = CliArgs::parse_from([
        "readtrail",
        "report",
        "--database-url",
        "postgres://example",
        "--since-hours",
        "24",
        "--limit",
        "10",
    ]);

    match args.command.expect("report command") {
        Command::Report(report) => {
            assert_eq!(
                report.store.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(report.since_hours, 24);
            assert_eq!(report.limit, 10);
        }
        _ => panic!("wrong command parsed"),
    }
}
