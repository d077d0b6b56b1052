use std::sync::Arc;

use gjallar_lib::{App, AppConfig, ListenerRegistry, NoopCertManager};

fn app_from_toml(toml: &str) -> App {
    let cfg: AppConfig = toml::from_str(toml).expect("config parses");
    App::new(
        cfg,
        Arc::new(ListenerRegistry::new()),
        Arc::new(NoopCertManager),
    )
}

#[test]
fn disjoint_addresses_validate() {
    let mut app = app_from_toml(
        r#"
[servers.srvA]
listen = ["tcp/:8080"]

[servers.srvB]
listen = ["tcp/:8081", "unix//run/b.sock"]
"#,
    );
    app.provision().expect("provision succeeds");
    app.validate().expect("validate succeeds");
}

#[test]
fn port_range_collision_is_detected() {
    let mut app = app_from_toml(
        r#"
[servers.srvA]
listen = ["tcp/:9000-9001"]

[servers.srvB]
listen = ["tcp/:9001"]
"#,
    );
    app.provision().expect("provision succeeds");
    let err = app.validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "listener address repeated: tcp/:9001 (already claimed by server 'srvA')"
    );
}

#[test]
fn collision_within_one_server_is_detected() {
    let mut app = app_from_toml(
        r#"
[servers.srvA]
listen = ["tcp/:9100", ":9100"]
"#,
    );
    app.provision().expect("provision succeeds");
    assert!(app.validate().is_err());
}

#[test]
fn same_port_different_hosts_is_allowed() {
    let mut app = app_from_toml(
        r#"
[servers.srvA]
listen = ["tcp/127.0.0.1:9200"]

[servers.srvB]
listen = ["tcp/127.0.0.2:9200"]
"#,
    );
    app.provision().expect("provision succeeds");
    app.validate().expect("validate succeeds");
}

#[test]
fn unix_socket_collision_is_detected() {
    let mut app = app_from_toml(
        r#"
[servers.srvA]
listen = ["unix//run/shared.sock"]

[servers.srvB]
listen = ["unix//run/shared.sock"]
"#,
    );
    app.provision().expect("provision succeeds");
    let err = app.validate().unwrap_err();
    assert!(err.to_string().contains("unix//run/shared.sock"), "{err}");
}
