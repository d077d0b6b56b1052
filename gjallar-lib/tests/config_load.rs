use std::fs;

use gjallar_lib::config::load_from_path;
use tempfile::NamedTempFile;

mod helpers;

#[test]
fn loads_minimal_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = NamedTempFile::new()?;
    let toml = r#"
[servers.main]
listen = [":8080"]
"#;
    fs::write(file.path(), toml)?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.http_port, 80);
    assert_eq!(cfg.https_port, 443);
    assert_eq!(cfg.grace_period_ms, 0);
    assert_eq!(cfg.shutdown_delay_ms, 0);
    assert_eq!(cfg.servers.len(), 1);
    let srv = &cfg.servers["main"];
    assert_eq!(srv.listen, vec![":8080"]);
    assert!(srv.protocols.is_none());
    assert!(srv.routes.is_empty());
    assert!(srv.tls_connection_policies.is_empty());
    assert_eq!(srv.client_ip_headers, vec!["X-Forwarded-For"]);
    assert_eq!(srv.timeouts.read_header_ms, 60_000);
    assert_eq!(srv.timeouts.idle_ms, 300_000);
    Ok(())
}

#[test]
fn loads_routes_and_protocols() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = NamedTempFile::new()?;
    let toml = r#"
grace_period_ms = 5000
shutdown_delay_ms = 2000

[servers.web]
listen = ["tcp/:8000-8002", "unix//run/web.sock"]
protocols = ["h1", "h2c"]

[[servers.web.routes]]
terminal = true

[[servers.web.routes.match]]
host = ["example.com", "*.example.com"]
path = ["/api/*"]

[[servers.web.routes.handle]]
handler = "static_response"
status_code = 204
"#;
    fs::write(file.path(), toml)?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.grace_period_ms, 5000);
    assert_eq!(cfg.shutdown_delay_ms, 2000);
    let srv = &cfg.servers["web"];
    assert_eq!(srv.listen.len(), 2);
    assert_eq!(
        srv.protocols.as_deref(),
        Some(&[gjallar_lib::Protocol::H1, gjallar_lib::Protocol::H2c][..])
    );
    assert_eq!(srv.routes.len(), 1);
    let route = &srv.routes[0];
    assert!(route.terminal);
    assert_eq!(route.matchers.len(), 1);
    assert_eq!(route.matchers[0].host.len(), 2);
    assert_eq!(route.matchers[0].path, vec!["/api/*"]);
    Ok(())
}

#[test]
fn loads_tls_policies_and_wrappers() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (cert_file, key_file) = helpers::create_valid_test_cert(&["localhost"])?;
    let file = NamedTempFile::new()?;
    let toml = format!(
        r#"
[servers.secure]
listen = [":8443"]
strict_sni_host = false
listener_wrappers = [{{ wrapper = "tls" }}]

[[servers.secure.tls_connection_policies]]
match_sni = ["example.com"]
alpn = ["h2", "http/1.1"]

[servers.secure.tls_connection_policies.certificate]
cert_path = "{}"
key_path = "{}"
"#,
        cert_file.path().display(),
        key_file.path().display()
    );
    fs::write(file.path(), toml)?;

    let cfg = load_from_path(file.path())?;
    let srv = &cfg.servers["secure"];
    assert_eq!(srv.strict_sni_host, Some(false));
    assert_eq!(srv.listener_wrappers.len(), 1);
    assert_eq!(srv.tls_connection_policies.len(), 1);
    let policy = &srv.tls_connection_policies[0];
    assert_eq!(policy.match_sni, vec!["example.com"]);
    assert_eq!(policy.alpn, vec!["h2", "http/1.1"]);
    assert!(policy.certificate.is_some());
    assert!(!policy.client_auth.is_required());
    Ok(())
}

#[test]
fn rejects_missing_certificate_file() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = NamedTempFile::new()?;
    let toml = r#"
[servers.secure]
listen = [":8443"]

[[servers.secure.tls_connection_policies]]

[servers.secure.tls_connection_policies.certificate]
cert_path = "/nonexistent/server.crt"
key_path = "/nonexistent/server.key"
"#;
    fs::write(file.path(), toml)?;

    let err = load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("certificate file not found"), "{err}");
    Ok(())
}

#[test]
fn rejects_empty_servers() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = NamedTempFile::new()?;
    fs::write(file.path(), "[servers]\n")?;
    let err = load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("at least one server"), "{err}");
    Ok(())
}

#[test]
fn rejects_server_without_listen() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = NamedTempFile::new()?;
    let toml = r#"
[servers.main]
listen = []
"#;
    fs::write(file.path(), toml)?;
    let err = load_from_path(file.path()).unwrap_err();
    assert!(err.to_string().contains("listen address"), "{err}");
    Ok(())
}
