#![allow(clippy::unwrap_used)]
// Loading and translation tests. `figment::Jail` gives each test its own
// working directory and environment so overrides do not leak.

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use edgeward_api::TlsMode;
use edgeward_config::{ConfigError, load_config, resolve_credential};
use edgeward_core::{Mode, ProviderSettings};

const MINIMAL: &str = r#"
[device]
id = "edge-01"

[control]
endpoint = "wss://control.example.net/agent"
credential = "env:EDGE_TOKEN"
"#;

fn load(path: &str) -> Result<edgeward_config::Config, figment::Error> {
    load_config(Some(Path::new(path))).map_err(|e| figment::Error::from(e.to_string()))
}

#[test]
fn minimal_file_gets_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", MINIMAL)?;
        jail.set_env("EDGE_TOKEN", "s3cret");

        let config = load("agent.toml")?;
        let agent = config.to_agent_config().unwrap();

        assert_eq!(agent.device_id, "edge-01");
        assert_eq!(agent.endpoint.as_str(), "wss://control.example.net/agent");
        assert_eq!(agent.credential.expose_secret(), "s3cret");
        assert_eq!(agent.initial_mode, Mode::Shadow);
        assert_eq!(agent.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(agent.auth_timeout, Duration::from_secs(10));
        assert_eq!(agent.backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(agent.backoff.max_delay, Duration::from_secs(60));
        assert_eq!(agent.backoff.auth_min_delay, Duration::from_secs(30));
        assert_eq!(agent.resync_interval, None);
        assert_eq!(agent.metrics_interval, Duration::from_secs(60));
        assert_eq!(agent.provider_timeout, Duration::from_secs(30));
        assert_eq!(agent.retry.max_attempts, 3);
        assert_eq!(agent.retry.initial_delay, Duration::from_millis(200));

        let ProviderSettings::Linux(linux) = agent.provider else {
            panic!("expected linux provider by default");
        };
        assert_eq!(linux.route_table, 100);
        assert_eq!(linux.nft_path, Path::new("nft"));
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", MINIMAL)?;
        jail.set_env("EDGE_TOKEN", "s3cret");
        jail.set_env("EDGEWARD_AGENT__MODE", "enforce");
        jail.set_env("EDGEWARD_AGENT__RESYNC_SECS", "300");
        jail.set_env("EDGEWARD_DEVICE__ID", "edge-02");

        let agent = load("agent.toml")?.to_agent_config().unwrap();
        assert_eq!(agent.device_id, "edge-02");
        assert_eq!(agent.initial_mode, Mode::Enforce);
        assert_eq!(agent.resync_interval, Some(Duration::from_secs(300)));
        Ok(())
    });
}

#[test]
fn nested_tables_are_read() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "agent.toml",
            &format!(
                r#"{MINIMAL}
[control.backoff]
initial_ms = 250
max_secs = 120

[agent]
mode = "ENFORCE"
metrics_interval_secs = 15

[agent.retry]
max_attempts = 5
max_ms = 1000

[provider]
kind = "linux"

[provider.linux]
state_dir = "/run/edgeward"
route_table = 200
"#
            ),
        )?;
        jail.set_env("EDGE_TOKEN", "s3cret");

        let agent = load("agent.toml")?.to_agent_config().unwrap();
        assert_eq!(agent.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(agent.backoff.max_delay, Duration::from_secs(120));
        assert_eq!(agent.initial_mode, Mode::Enforce);
        assert_eq!(agent.metrics_interval, Duration::from_secs(15));
        assert_eq!(agent.retry.max_attempts, 5);
        assert_eq!(agent.retry.max_delay, Duration::from_secs(1));

        let ProviderSettings::Linux(linux) = agent.provider else {
            panic!("expected linux provider");
        };
        assert_eq!(linux.state_dir, Path::new("/run/edgeward"));
        assert_eq!(linux.route_table, 200);
        assert_eq!(linux.ip_path, Path::new("ip"));
        Ok(())
    });
}

#[test]
fn router_api_provider_with_file_credential() {
    Jail::expect_with(|jail| {
        jail.create_file("api.key", "r0uter-key\n")?;
        let key_path = jail.directory().join("api.key");
        jail.create_file(
            "agent.toml",
            &format!(
                r#"{MINIMAL}
[provider]
kind = "router-api"

[provider.router_api]
url = "https://192.168.1.1:8443"
api_key = "file:{}"
insecure = true
timeout_secs = 5
"#,
                key_path.display()
            ),
        )?;
        jail.set_env("EDGE_TOKEN", "s3cret");

        let agent = load("agent.toml")?.to_agent_config().unwrap();
        let ProviderSettings::RouterApi(api) = agent.provider else {
            panic!("expected router-api provider");
        };
        assert_eq!(api.url.as_str(), "https://192.168.1.1:8443/");
        assert_eq!(api.api_key.unwrap().expose_secret(), "r0uter-key");
        assert_eq!(api.tls, TlsMode::DangerAcceptInvalid);
        assert_eq!(api.timeout, Duration::from_secs(5));
        Ok(())
    });
}

#[test]
fn router_api_without_table_is_invalid() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", MINIMAL)?;
        jail.set_env("EDGE_TOKEN", "s3cret");
        jail.set_env("EDGEWARD_PROVIDER__KIND", "router-api");

        let err = load("agent.toml")?.to_agent_config().unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "provider.router_api"),
            "{err}"
        );
        Ok(())
    });
}

// ── Validation failures ─────────────────────────────────────────────

fn validation_field(err: &ConfigError) -> &str {
    match err {
        ConfigError::Validation { field, .. } => field,
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn bad_values_name_their_field() {
    let cases = [
        ("EDGEWARD_DEVICE__ID", " ", "device.id"),
        ("EDGEWARD_CONTROL__ENDPOINT", "https://control.example.net", "control.endpoint"),
        ("EDGEWARD_CONTROL__ENDPOINT", "not a url", "control.endpoint"),
        ("EDGEWARD_AGENT__MODE", "yolo", "agent.mode"),
        ("EDGEWARD_PROVIDER__KIND", "openwrt", "provider.kind"),
        ("EDGEWARD_AGENT__RETRY__MAX_ATTEMPTS", "0", "agent.retry.max_attempts"),
        ("EDGEWARD_CONTROL__AUTH_TIMEOUT_SECS", "0", "control.auth_timeout_secs"),
        ("EDGEWARD_AGENT__PROVIDER_TIMEOUT_SECS", "0", "agent.provider_timeout_secs"),
    ];

    for (var, value, field) in cases {
        Jail::expect_with(|jail| {
            jail.create_file("agent.toml", MINIMAL)?;
            jail.set_env("EDGE_TOKEN", "s3cret");
            jail.set_env(var, value);

            let err = load("agent.toml")?.to_agent_config().unwrap_err();
            assert_eq!(validation_field(&err), field, "{var}={value}");
            Ok(())
        });
    }
}

#[test]
fn unset_credential_variable_is_reported() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", MINIMAL)?;

        let err = load("agent.toml")?.to_agent_config().unwrap_err();
        assert!(
            matches!(&err, ConfigError::NoCredentials { field, .. } if field == "control.credential"),
            "{err}"
        );
        assert!(err.to_string().contains("EDGE_TOKEN"));
        Ok(())
    });
}

#[test]
fn malformed_toml_is_a_load_error() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", "[device\nid = 3")?;
        let err = load_config(Some(Path::new("agent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)), "{err}");
        Ok(())
    });
}

#[test]
fn explicit_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "{err}");
}

// ── Credential references ───────────────────────────────────────────

#[test]
fn plain_and_file_references() {
    assert_eq!(
        resolve_credential("x", "plain:abc").unwrap().expose_secret(),
        "abc"
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    std::fs::write(&path, "tok\r\n").unwrap();
    let secret = resolve_credential("x", &format!("file:{}", path.display())).unwrap();
    assert_eq!(secret.expose_secret(), "tok");
}

#[test]
fn empty_secret_file_is_no_credential() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    std::fs::write(&path, "\n").unwrap();

    let err = resolve_credential("x", &format!("file:{}", path.display())).unwrap_err();
    assert!(matches!(err, ConfigError::NoCredentials { .. }), "{err}");
}

// ── Summary ─────────────────────────────────────────────────────────

#[test]
fn summary_masks_plain_credentials() {
    Jail::expect_with(|jail| {
        jail.create_file("agent.toml", MINIMAL)?;
        jail.set_env("EDGEWARD_CONTROL__CREDENTIAL", "plain:hunter2");

        let config = load("agent.toml")?;
        let summary = config.summary().unwrap();
        assert!(summary.contains("plain:<redacted>"), "{summary}");
        assert!(!summary.contains("hunter2"));
        assert!(summary.contains("edge-01"));
        Ok(())
    });
}
