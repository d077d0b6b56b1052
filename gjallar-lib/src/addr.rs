use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{AppError, Result};

/// Transport network of a listen address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Unix,
    Unixgram,
    Fd,
    Fdgram,
}

impl Network {
    pub fn parse(s: &str) -> Option<Network> {
        match s {
            "tcp" => Some(Network::Tcp),
            "tcp4" => Some(Network::Tcp4),
            "tcp6" => Some(Network::Tcp6),
            "udp" => Some(Network::Udp),
            "unix" => Some(Network::Unix),
            "unixgram" => Some(Network::Unixgram),
            "fd" => Some(Network::Fd),
            "fdgram" => Some(Network::Fdgram),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Unix => "unix",
            Network::Unixgram => "unixgram",
            Network::Fd => "fd",
            Network::Fdgram => "fdgram",
        }
    }

    /// Stream-oriented networks carry HTTP/1 and HTTP/2
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Network::Tcp | Network::Tcp4 | Network::Tcp6 | Network::Unix | Network::Fd
        )
    }

    /// Datagram-oriented networks carry HTTP/3
    pub fn is_datagram(self) -> bool {
        matches!(self, Network::Udp | Network::Unixgram | Network::Fdgram)
    }

    pub fn is_unix(self) -> bool {
        matches!(self, Network::Unix | Network::Unixgram)
    }

    /// File-descriptor networks reference an inherited socket by number
    pub fn is_fd(self) -> bool {
        matches!(self, Network::Fd | Network::Fdgram)
    }
}

/// A parsed listen address: `[network/]host:port_or_range`
///
/// For `unix`/`unixgram` networks the host is the socket path and the port
/// range is empty. For `fd`/`fdgram` the host is the descriptor number.
/// A port range `a-b` expands to `b-a+1` concrete addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenAddr {
    pub network: Network,
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl ListenAddr {
    pub fn parse(s: &str) -> Result<ListenAddr> {
        // "unix//tmp/x" keeps the leading slash of the path in the remainder
        let (network, rest) = match s.split_once('/').map(|(head, rest)| (Network::parse(head), rest)) {
            Some((Some(network), rest)) => (network, rest),
            _ => (Network::Tcp, s),
        };

        if network.is_unix() {
            if rest.is_empty() {
                return Err(AppError::InvalidConfiguration(format!(
                    "listen address '{s}': unix socket path is empty"
                )));
            }
            return Ok(ListenAddr { network, host: rest.to_string(), start_port: 0, end_port: 0 });
        }

        if network.is_fd() {
            rest.parse::<u32>().map_err(|_| {
                AppError::InvalidConfiguration(format!(
                    "listen address '{s}': file descriptor must be a number"
                ))
            })?;
            return Ok(ListenAddr { network, host: rest.to_string(), start_port: 0, end_port: 0 });
        }

        let (host, port_part) = split_host_port(rest).ok_or_else(|| {
            AppError::InvalidConfiguration(format!("listen address '{s}': missing port"))
        })?;

        let (start_port, end_port) = match port_part.split_once('-') {
            Some((a, b)) => {
                let start = parse_port(s, a)?;
                let end = parse_port(s, b)?;
                if end < start {
                    return Err(AppError::InvalidConfiguration(format!(
                        "listen address '{s}': port range is reversed"
                    )));
                }
                (start, end)
            }
            None => {
                let p = parse_port(s, port_part)?;
                (p, p)
            }
        };

        Ok(ListenAddr { network, host: host.to_string(), start_port, end_port })
    }

    /// Number of concrete addresses this listen address expands to
    pub fn port_range_size(&self) -> u32 {
        if self.network.is_unix() || self.network.is_fd() {
            return 1;
        }
        u32::from(self.end_port) - u32::from(self.start_port) + 1
    }

    pub fn port(&self, offset: u32) -> u16 {
        self.start_port.saturating_add(offset as u16)
    }

    /// A single-port copy of this address at the given range offset
    pub fn at(&self, offset: u32) -> ListenAddr {
        let port = self.port(offset);
        ListenAddr {
            network: self.network,
            host: self.host.clone(),
            start_port: port,
            end_port: port,
        }
    }

    /// True when the OS picks the port at bind time
    pub fn is_wildcard_port(&self) -> bool {
        !self.network.is_unix() && !self.network.is_fd() && self.start_port == 0
    }

    /// Key used by the listener registry and the duplicate-address map
    pub fn registry_key_at(&self, offset: u32) -> String {
        if self.network.is_unix() || self.network.is_fd() {
            format!("{}|{}", self.network.as_str(), self.host)
        } else {
            format!("{}|{}:{}", self.network.as_str(), self.host, self.port(offset))
        }
    }

    /// The `host:port` form used for socket binding
    pub fn join_host_port(&self, offset: u32) -> String {
        let host: &str = if self.host.is_empty() {
            match self.network {
                Network::Tcp6 => "[::]",
                _ => "0.0.0.0",
            }
        } else {
            &self.host
        };
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port(offset))
        } else {
            format!("{}:{}", host, self.port(offset))
        }
    }

    /// Resolve a concrete socket address for binding, without DNS
    pub fn socket_addr(&self, offset: u32) -> Result<SocketAddr> {
        let host: &str = if self.host.is_empty() {
            match self.network {
                Network::Tcp6 => "::",
                _ => "0.0.0.0",
            }
        } else {
            &self.host
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = if host == "localhost" {
            IpAddr::from([127, 0, 0, 1])
        } else {
            host.parse().map_err(|_| {
                AppError::InvalidConfiguration(format!(
                    "listen address '{self}': host '{host}' is not an IP address"
                ))
            })?
        };
        Ok(SocketAddr::new(ip, self.port(offset)))
    }

    /// The datagram twin of a stream address, used to pair H3 with H1/H2
    pub fn datagram_companion(&self, offset: u32) -> ListenAddr {
        let port = self.port(offset);
        ListenAddr {
            network: match self.network {
                Network::Unix => Network::Unixgram,
                Network::Fd => Network::Fdgram,
                _ => Network::Udp,
            },
            host: self.host.clone(),
            start_port: port,
            end_port: port,
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.network.is_unix() || self.network.is_fd() {
            write!(f, "{}/{}", self.network.as_str(), self.host)
        } else if self.start_port == self.end_port {
            write!(f, "{}/{}:{}", self.network.as_str(), self.host, self.start_port)
        } else {
            write!(
                f,
                "{}/{}:{}-{}",
                self.network.as_str(),
                self.host,
                self.start_port,
                self.end_port
            )
        }
    }
}

fn split_host_port(s: &str) -> Option<(&str, &str)> {
    if let Some(end) = s.find(']') {
        // bracketed IPv6 literal
        let host = &s[..=end];
        let rest = &s[end + 1..];
        let port = rest.strip_prefix(':')?;
        return Some((host, port));
    }
    let idx = s.rfind(':')?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn parse_port(addr: &str, s: &str) -> Result<u16> {
    s.parse::<u16>().map_err(|_| {
        AppError::InvalidConfiguration(format!("listen address '{addr}': invalid port '{s}'"))
    })
}
