use std::sync::Arc;

use gjallar_lib::listener::{
    BoxListener, ListenerWrapper, WrapperPipeline, WrapperStage,
};
use gjallar_lib::{App, AppConfig, ListenerRegistry, NoopCertManager, Protocol};

mod helpers;

fn app_from_toml(toml: &str) -> App {
    let cfg: AppConfig = toml::from_str(toml).expect("config parses");
    App::new(
        cfg,
        Arc::new(ListenerRegistry::new()),
        Arc::new(NoopCertManager),
    )
}

#[test]
fn protocol_default_is_h1_h2_h3() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080"]
"#,
    );
    app.provision().expect("provision succeeds");
    let server = app.server("main").expect("server exists");
    assert_eq!(
        server.listen_protocols(),
        &[vec![Protocol::H1, Protocol::H2, Protocol::H3]]
    );
}

#[test]
fn h2_without_h1_is_rejected() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080"]
protocols = ["h2"]
"#,
    );
    let err = app.provision().unwrap_err();
    assert!(
        err.to_string()
            .contains("cannot enable HTTP/2 or H2C without enabling HTTP/1.1"),
        "{err}"
    );
}

#[test]
fn h2c_without_h1_is_rejected() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080"]
protocols = ["h2c", "h3"]
"#,
    );
    assert!(app.provision().is_err());
}

#[test]
fn listen_protocols_length_must_match_listen() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080", ":8081"]
listen_protocols = [["h1"]]
"#,
    );
    let err = app.provision().unwrap_err();
    assert!(err.to_string().contains("listen_protocols"), "{err}");
}

#[test]
fn listen_protocols_entries_inherit_server_set() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080", ":8081"]
protocols = ["h1"]
listen_protocols = [["h1", "h2"], []]
"#,
    );
    app.provision().expect("provision succeeds");
    let server = app.server("main").expect("server exists");
    assert_eq!(server.listen_protocols().len(), 2);
    assert_eq!(server.listen_protocols()[0], vec![Protocol::H1, Protocol::H2]);
    // an empty override entry is an explicit empty set, not inheritance
    assert!(server.listen_protocols()[1].is_empty());
}

#[test]
fn explicit_tls_placeholder_first_is_rejected() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080"]
listener_wrappers = [{ wrapper = "tls" }]
"#,
    );
    let err = app.provision().unwrap_err();
    assert!(err.to_string().contains("redundant"), "{err}");
}

struct NoopWrapper;

impl ListenerWrapper for NoopWrapper {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn wrap(&self, inner: BoxListener) -> BoxListener {
        inner
    }
}

#[test]
fn pipeline_without_placeholder_gets_one_prepended() {
    let pipeline =
        WrapperPipeline::normalize(vec![WrapperStage::Wrapper(Arc::new(NoopWrapper))])
            .expect("normalizes");
    assert_eq!(pipeline.placeholder_index(), 0);
    assert_eq!(pipeline.stage_names(), vec!["tls", "noop"]);
}

#[test]
fn pipeline_keeps_explicit_placeholder_position() {
    let pipeline = WrapperPipeline::normalize(vec![
        WrapperStage::Wrapper(Arc::new(NoopWrapper)),
        WrapperStage::TlsPlaceholder,
        WrapperStage::Wrapper(Arc::new(NoopWrapper)),
    ])
    .expect("normalizes");
    assert_eq!(pipeline.placeholder_index(), 1);
    assert_eq!(pipeline.stage_names(), vec!["noop", "tls", "noop"]);
}

#[test]
fn pipeline_rejects_double_placeholder() {
    let err = WrapperPipeline::normalize(vec![
        WrapperStage::Wrapper(Arc::new(NoopWrapper)),
        WrapperStage::TlsPlaceholder,
        WrapperStage::TlsPlaceholder,
    ])
    .unwrap_err();
    assert!(err.to_string().contains("only one tls listener wrapper"), "{err}");
}

#[test]
fn pipeline_rejects_leading_placeholder_with_wrappers() {
    let err = WrapperPipeline::normalize(vec![
        WrapperStage::TlsPlaceholder,
        WrapperStage::Wrapper(Arc::new(NoopWrapper)),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("redundant"), "{err}");
}

#[test]
fn client_auth_defaults_strict_sni_host() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let (cert_file, key_file) = helpers::create_valid_test_cert(&["mtls.example"])?;
    let toml = format!(
        r#"
[servers.secure]
listen = [":8443"]

[[servers.secure.tls_connection_policies]]

[servers.secure.tls_connection_policies.certificate]
cert_path = "{cert}"
key_path = "{key}"

[servers.secure.tls_connection_policies.client_auth.required]
ca_cert_path = "{cert}"
"#,
        cert = cert_file.path().display(),
        key = key_file.path().display()
    );
    let mut app = app_from_toml(&toml);
    app.provision()?;
    assert!(app.server("secure").expect("server exists").strict_sni_host());
    Ok(())
}

#[test]
fn strict_sni_host_explicit_false_wins() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (cert_file, key_file) = helpers::create_valid_test_cert(&["mtls.example"])?;
    let toml = format!(
        r#"
[servers.secure]
listen = [":8443"]
strict_sni_host = false

[[servers.secure.tls_connection_policies]]

[servers.secure.tls_connection_policies.certificate]
cert_path = "{cert}"
key_path = "{key}"

[servers.secure.tls_connection_policies.client_auth.required]
ca_cert_path = "{cert}"
"#,
        cert = cert_file.path().display(),
        key = key_file.path().display()
    );
    let mut app = app_from_toml(&toml);
    app.provision()?;
    assert!(!app.server("secure").expect("server exists").strict_sni_host());
    Ok(())
}

#[test]
fn logger_keys_with_port_are_rejected() {
    let mut app = app_from_toml(
        r#"
[servers.main]
listen = [":8080"]

[servers.main.logs]
default_logger_name = "main"

[servers.main.logs.logger_names]
"example.com:8080" = "scoped"
"#,
    );
    let err = app.provision().unwrap_err();
    assert!(err.to_string().contains("must not contain a port"), "{err}");
}

#[test]
fn provision_is_idempotent() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (cert_file, key_file) = helpers::create_valid_test_cert(&["app.example"])?;
    let toml = format!(
        r#"
[servers.web]
listen = [":80", ":443"]

[[servers.web.routes]]

[[servers.web.routes.match]]
host = ["app.example"]

[[servers.web.routes.handle]]
handler = "static_response"
status_code = 200

[[servers.web.tls_connection_policies]]

[servers.web.tls_connection_policies.certificate]
cert_path = "{cert}"
key_path = "{key}"
"#,
        cert = cert_file.path().display(),
        key = key_file.path().display()
    );
    let mut app = app_from_toml(&toml);
    app.provision()?;
    let domains_first: Vec<String> = app.cert_domains().iter().cloned().collect();
    let stages_first = app.server("web").expect("server").wrapper_stages();
    let protos_first = app.server("web").expect("server").listen_protocols().to_vec();

    app.provision()?;
    let domains_second: Vec<String> = app.cert_domains().iter().cloned().collect();
    assert_eq!(domains_first, domains_second);
    assert_eq!(stages_first, app.server("web").expect("server").wrapper_stages());
    assert_eq!(
        protos_first,
        app.server("web").expect("server").listen_protocols().to_vec()
    );
    Ok(())
}
