use gjallar_lib::{ListenAddr, Network};

#[test]
fn parses_bare_host_port_as_tcp() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("127.0.0.1:8080")?;
    assert_eq!(addr.network, Network::Tcp);
    assert_eq!(addr.host, "127.0.0.1");
    assert_eq!(addr.start_port, 8080);
    assert_eq!(addr.end_port, 8080);
    assert_eq!(addr.port_range_size(), 1);
    Ok(())
}

#[test]
fn parses_network_prefix() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("tcp6/:443")?;
    assert_eq!(addr.network, Network::Tcp6);
    assert_eq!(addr.host, "");
    assert_eq!(addr.start_port, 443);
    Ok(())
}

#[test]
fn expands_port_ranges() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("tcp/:8000-8002")?;
    assert_eq!(addr.port_range_size(), 3);
    let concrete: Vec<String> = (0..addr.port_range_size())
        .map(|i| addr.at(i).to_string())
        .collect();
    assert_eq!(concrete, vec!["tcp/:8000", "tcp/:8001", "tcp/:8002"]);
    Ok(())
}

#[test]
fn rejects_reversed_range() {
    let err = ListenAddr::parse("tcp/:9001-9000").unwrap_err();
    assert!(err.to_string().contains("reversed"), "{err}");
}

#[test]
fn rejects_missing_port() {
    assert!(ListenAddr::parse("tcp/localhost").is_err());
}

#[test]
fn parses_unix_path_with_leading_slash() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("unix//tmp/x")?;
    assert_eq!(addr.network, Network::Unix);
    assert_eq!(addr.host, "/tmp/x");
    assert_eq!(addr.port_range_size(), 1);
    assert!(addr.network.is_unix());
    assert!(addr.network.is_stream());
    assert_eq!(addr.to_string(), "unix//tmp/x");
    Ok(())
}

#[test]
fn parses_fd_forms() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("fd/3")?;
    assert_eq!(addr.network, Network::Fd);
    assert_eq!(addr.host, "3");
    assert!(addr.network.is_fd());

    let gram = ListenAddr::parse("fdgram/4")?;
    assert_eq!(gram.network, Network::Fdgram);
    assert!(gram.network.is_datagram());
    Ok(())
}

#[test]
fn rejects_non_numeric_fd() {
    assert!(ListenAddr::parse("fd/three").is_err());
}

#[test]
fn detects_wildcard_port() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    assert!(ListenAddr::parse(":0")?.is_wildcard_port());
    assert!(!ListenAddr::parse(":8080")?.is_wildcard_port());
    assert!(!ListenAddr::parse("unix//tmp/x")?.is_wildcard_port());
    Ok(())
}

#[test]
fn registry_keys_include_network_and_port() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let addr = ListenAddr::parse("tcp/:8000-8001")?;
    assert_eq!(addr.registry_key_at(0), "tcp|:8000");
    assert_eq!(addr.registry_key_at(1), "tcp|:8001");

    let unix = ListenAddr::parse("unix//run/app.sock")?;
    assert_eq!(unix.registry_key_at(0), "unix|/run/app.sock");
    Ok(())
}

#[test]
fn datagram_companion_pairs_h3_with_stream_port() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let addr = ListenAddr::parse("tcp/127.0.0.1:8443")?;
    let udp = addr.datagram_companion(0);
    assert_eq!(udp.network, Network::Udp);
    assert_eq!(udp.host, "127.0.0.1");
    assert_eq!(udp.start_port, 8443);
    Ok(())
}

#[test]
fn parses_bracketed_ipv6() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = ListenAddr::parse("tcp/[::1]:9000")?;
    assert_eq!(addr.host, "[::1]");
    assert_eq!(addr.start_port, 9000);
    let sa = addr.socket_addr(0)?;
    assert!(sa.is_ipv6());
    Ok(())
}
