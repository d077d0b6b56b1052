use std::sync::Arc;
use std::time::Duration;

use gjallar_lib::{App, AppConfig, ListenerRegistry, NoopCertManager};
use serial_test::serial;
use tokio::time::Instant;

mod helpers;

fn app_from_toml(toml: &str, registry: Arc<ListenerRegistry>) -> App {
    let cfg: AppConfig = toml::from_str(toml).expect("config parses");
    App::new(cfg, registry, Arc::new(NoopCertManager))
}

async fn start_app(toml: &str, registry: Arc<ListenerRegistry>) -> App {
    let mut app = app_from_toml(toml, registry);
    app.provision().expect("provision succeeds");
    app.validate().expect("validate succeeds");
    app.start().await.expect("start succeeds");
    app
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn two_servers_on_disjoint_ports_serve_and_stop() {
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
grace_period_ms = 1000

[servers.srvA]
listen = ["tcp/127.0.0.1:18080"]
protocols = ["h1"]

[[servers.srvA.routes]]
[[servers.srvA.routes.handle]]
handler = "static_response"
status_code = 200
body = "hello from A"

[servers.srvB]
listen = ["tcp/127.0.0.1:18081"]
protocols = ["h1"]

[[servers.srvB.routes]]
[[servers.srvB.routes.handle]]
handler = "static_response"
status_code = 200
body = "hello from B"
"#,
        registry.clone(),
    )
    .await;

    assert_eq!(registry.usage("tcp|127.0.0.1:18080"), 1);
    assert_eq!(registry.usage("tcp|127.0.0.1:18081"), 1);

    let client = reqwest::Client::new();
    let resp = client
        .get("http://127.0.0.1:18080/")
        .send()
        .await
        .expect("request to srvA");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "hello from A");

    let resp = client
        .get("http://127.0.0.1:18081/")
        .send()
        .await
        .expect("request to srvB");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "hello from B");
    drop(client);

    let start = Instant::now();
    app.stop(true).await;
    assert!(
        start.elapsed() < Duration::from_millis(1000),
        "idle stop finished within the grace period: {:?}",
        start.elapsed()
    );

    // listeners are released and new connections are refused
    assert_eq!(registry.usage("tcp|127.0.0.1:18080"), 0);
    let refused = reqwest::Client::builder()
        .timeout(Duration::from_millis(250))
        .build()
        .expect("client builds")
        .get("http://127.0.0.1:18080/")
        .send()
        .await;
    assert!(refused.is_err(), "stopped server must not accept connections");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn unmatched_requests_get_404() {
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
[servers.main]
listen = ["tcp/127.0.0.1:18082"]
protocols = ["h1"]

[[servers.main.routes]]
[[servers.main.routes.match]]
path = ["/present"]

[[servers.main.routes.handle]]
handler = "static_response"
status_code = 200
"#,
        registry,
    )
    .await;

    let client = reqwest::Client::new();
    let hit = client
        .get("http://127.0.0.1:18082/present")
        .send()
        .await
        .expect("matched request");
    assert_eq!(hit.status(), 200);

    let miss = client
        .get("http://127.0.0.1:18082/absent")
        .send()
        .await
        .expect("unmatched request");
    assert_eq!(miss.status(), 404);

    app.stop(true).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn tls_listener_serves_h1_and_h2_and_h3_binds() {
    let (cert_file, key_file) = helpers::create_valid_test_cert(&["localhost"]).expect("cert");
    let cert_pem = std::fs::read(cert_file.path()).expect("cert readable");

    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        &format!(
            r#"
grace_period_ms = 2000

[servers.secure]
listen = ["tcp/127.0.0.1:18443"]
protocols = ["h1", "h2", "h3"]

[[servers.secure.routes]]
[[servers.secure.routes.handle]]
handler = "static_response"
status_code = 200
body = "secure"

[[servers.secure.tls_connection_policies]]

[servers.secure.tls_connection_policies.certificate]
cert_path = "{}"
key_path = "{}"
"#,
            cert_file.path().display(),
            key_file.path().display()
        ),
        registry.clone(),
    )
    .await;

    // the datagram twin is claimed alongside the stream listener
    assert_eq!(registry.usage("tcp|127.0.0.1:18443"), 1);
    assert_eq!(registry.usage("udp|127.0.0.1:18443"), 1);

    let ca = reqwest::Certificate::from_pem(&cert_pem).expect("ca parses");
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(ca)
        .resolve(
            "localhost",
            "127.0.0.1:18443".parse().expect("socket addr"),
        )
        .build()
        .expect("client builds");

    let resp = client
        .get("https://localhost:18443/")
        .send()
        .await
        .expect("https request");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "secure");
    drop(client);

    let start = Instant::now();
    app.stop(true).await;
    assert!(start.elapsed() < Duration::from_millis(2000));
    assert_eq!(registry.usage("udp|127.0.0.1:18443"), 0);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn strict_sni_host_rejects_mismatched_host_with_421() {
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::CertificateDer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    let (cert_file, key_file) = helpers::create_valid_test_cert(&["localhost"]).expect("cert");
    let pem_bytes = std::fs::read(cert_file.path()).expect("cert readable");
    let cert_der = CertificateDer::pem_slice_iter(&pem_bytes)
        .next()
        .expect("one certificate")
        .expect("certificate parses");

    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        &format!(
            r#"
[servers.secure]
listen = ["tcp/127.0.0.1:18444"]
protocols = ["h1"]
strict_sni_host = true

[[servers.secure.routes]]
[[servers.secure.routes.handle]]
handler = "static_response"
status_code = 200
body = "ok"

[[servers.secure.tls_connection_policies]]

[servers.secure.tls_connection_policies.certificate]
cert_path = "{}"
key_path = "{}"
"#,
            cert_file.path().display(),
            key_file.path().display()
        ),
        registry,
    )
    .await;

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).expect("root added");
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    // SNI says localhost, Host says somewhere else: misdirected request
    let tcp = tokio::net::TcpStream::connect("127.0.0.1:18444")
        .await
        .expect("tcp connect");
    let name = ServerName::try_from("localhost").expect("server name");
    let mut tls = connector.connect(name, tcp).await.expect("tls connect");
    tls.write_all(b"GET / HTTP/1.1\r\nHost: other.example\r\nConnection: close\r\n\r\n")
        .await
        .expect("request written");
    let mut response = String::new();
    let _ = tls.read_to_string(&mut response).await;
    assert!(response.starts_with("HTTP/1.1 421"), "got: {response}");

    // matching SNI and Host goes through
    let tcp = tokio::net::TcpStream::connect("127.0.0.1:18444")
        .await
        .expect("tcp connect");
    let name = ServerName::try_from("localhost").expect("server name");
    let mut tls = connector.connect(name, tcp).await.expect("tls connect");
    tls.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .expect("request written");
    let mut response = String::new();
    let _ = tls.read_to_string(&mut response).await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");

    app.stop(true).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn h3_on_unix_socket_is_skipped_but_h1_serves() {
    let socket_dir = tempfile::tempdir().expect("temp dir");
    let socket_path = socket_dir.path().join("h3skip.sock");
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        &format!(
            r#"
[servers.local]
listen = ["unix/{}"]
protocols = ["h1", "h3"]

[[servers.local.routes]]
[[servers.local.routes.handle]]
handler = "static_response"
status_code = 200
"#,
            socket_path.display()
        ),
        registry.clone(),
    )
    .await;

    // the stream listener came up; no datagram listener was attempted
    assert_eq!(
        registry.usage(&format!("unix|{}", socket_path.display())),
        1
    );
    assert!(tokio::net::UnixStream::connect(&socket_path).await.is_ok());

    app.stop(true).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn shutdown_delay_is_skipped_during_reload() {
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
shutdown_delay_ms = 2000

[servers.main]
listen = ["tcp/127.0.0.1:17000"]
protocols = ["h1"]

[[servers.main.routes]]
[[servers.main.routes.handle]]
handler = "static_response"
status_code = 200
"#,
        registry.clone(),
    )
    .await;

    // a new configuration has claimed the same address: reload in flight
    registry.acquire("tcp|127.0.0.1:17000");
    assert_eq!(registry.usage("tcp|127.0.0.1:17000"), 2);

    let start = Instant::now();
    app.stop(false).await;
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "no delay during a reload handoff: {:?}",
        start.elapsed()
    );

    registry.release("tcp|127.0.0.1:17000");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn shutdown_delay_is_enforced_when_listener_closes() {
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
shutdown_delay_ms = 400

[servers.main]
listen = ["tcp/127.0.0.1:17001"]
protocols = ["h1"]

[[servers.main.routes]]
[[servers.main.routes.handle]]
handler = "static_response"
status_code = 200
"#,
        registry,
    )
    .await;

    let server = app.server("main").expect("server exists").clone();
    assert!(!server.shutting_down());

    let app = Arc::new(app);
    let stopper = app.clone();
    let stop_task = tokio::spawn(async move {
        let start = Instant::now();
        stopper.stop(true).await;
        start.elapsed()
    });

    // during the delay the server advertises shutdown and keeps serving
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(server.shutting_down());
    let remaining = server.time_until_shutdown().expect("deadline set");
    assert!(remaining <= Duration::from_millis(400));
    let resp = reqwest::get("http://127.0.0.1:17001/")
        .await
        .expect("request during delay");
    assert_eq!(resp.status(), 200);

    let elapsed = stop_task.await.expect("stop task");
    assert!(
        elapsed >= Duration::from_millis(400),
        "delay was enforced: {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn stop_hooks_run_and_errors_do_not_fail_stop() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
[servers.main]
listen = ["tcp/127.0.0.1:17002"]
protocols = ["h1"]
"#,
        registry,
    )
    .await;

    let ran = Arc::new(AtomicBool::new(false));
    let ran_hook = ran.clone();
    let server = app.server("main").expect("server exists");
    server.register_stop_hook(Box::new(move |_grace| {
        let ran = ran_hook.clone();
        Box::pin(async move {
            ran.store(true, Ordering::SeqCst);
            Err("hook failed on purpose".to_string())
        })
    }));

    app.stop(true).await;
    assert!(ran.load(Ordering::SeqCst), "stop hook ran");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn bind_conflict_fails_start_and_unwinds() {
    let registry = Arc::new(ListenerRegistry::new());
    let app = start_app(
        r#"
[servers.holder]
listen = ["tcp/127.0.0.1:17003"]
protocols = ["h1"]
"#,
        registry.clone(),
    )
    .await;

    // a second app (fresh registry, same port) must fail to bind
    let mut second = app_from_toml(
        r#"
[servers.clasher]
listen = ["tcp/127.0.0.1:17003"]
protocols = ["h1"]
"#,
        Arc::new(ListenerRegistry::new()),
    );
    second.provision().expect("provision succeeds");
    second.validate().expect("validate succeeds");
    let err = second.start().await.unwrap_err();
    assert!(err.to_string().contains("failed to bind"), "{err}");

    app.stop(true).await;
}
