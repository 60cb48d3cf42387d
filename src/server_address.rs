use std::{
    fmt::Display,
    net::{AddrParseError, IpAddr, SocketAddr},
    str::FromStr,
};

/// Port used when an address string leaves it out. Source servers listen for
/// both console and queries here.
pub const DEFAULT_PORT: u16 = 27015;

/// A host and port. It's possible that the host doesn't resolve to anything.
///
/// # Examples
///
/// `ServerAddress` implements TryFrom<&str>, so you can use it like this:
/// ```
/// use gameserver_utilities::ServerAddress;
///
/// let addr = ServerAddress::try_from("localhost:25575").unwrap();
/// assert_eq!(addr.host, "localhost");
/// assert_eq!(addr.port, 25575);
///
/// let addr = ServerAddress::try_from("[::1]").unwrap();
/// assert_eq!(addr.host, "::1");
/// assert_eq!(addr.port, 27015);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> Self {
        ServerAddress {
            host: host.to_string(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`, filling in
    /// `default_port` when none is given.
    pub fn parse(string: &str, default_port: u16) -> Result<Self, String> {
        let string = string.trim();
        if string.is_empty() {
            return Err("Empty string".to_string());
        }

        let (host, port) = if let Some(rest) = string.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or("Unclosed '[' in address")?;
            let port = match after {
                "" => None,
                after => Some(after.strip_prefix(':').ok_or("Expected ':' after ']'")?),
            };
            (host, port)
        } else if string.matches(':').count() > 1 {
            // bare IPv6 literal, no port possible
            (string, None)
        } else {
            match string.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (string, None),
            }
        };

        if host.is_empty() {
            return Err("No host specified".to_string());
        }
        let port = match port {
            Some(port) => u16::from_str(port).map_err(|_| "Invalid port specified")?,
            None => default_port,
        };
        Ok(ServerAddress::new(host, port))
    }
}

impl<'a> TryFrom<&'a str> for ServerAddress {
    type Error = String;

    /// Convert a server address (host:port, the port is optional) to a
    /// `ServerAddress`
    fn try_from(string: &str) -> Result<Self, Self::Error> {
        ServerAddress::parse(string, DEFAULT_PORT)
    }
}

impl From<SocketAddr> for ServerAddress {
    /// Convert an existing `SocketAddr` into a `ServerAddress`. This just
    /// converts the ip to a string and passes along the port. The resolver
    /// will realize it's already an IP address and not do any DNS requests.
    fn from(addr: SocketAddr) -> Self {
        ServerAddress {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl TryFrom<ServerAddress> for SocketAddr {
    type Error = AddrParseError;

    /// Convert an existing `ServerAddress` into a `SocketAddr`. Only works
    /// when the host is already an IP literal.
    fn try_from(addr: ServerAddress) -> Result<Self, Self::Error> {
        let ip = IpAddr::from_str(&addr.host)?;
        Ok(SocketAddr::new(ip, addr.port))
    }
}

impl Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_fills_in() {
        let addr = ServerAddress::parse("mc.example.com", 25575).unwrap();
        assert_eq!(addr, ServerAddress::new("mc.example.com", 25575));
    }

    #[test]
    fn ipv6_forms() {
        assert_eq!(
            ServerAddress::parse("[2001:db8::1]:27016", 1).unwrap(),
            ServerAddress::new("2001:db8::1", 27016)
        );
        assert_eq!(
            ServerAddress::parse("2001:db8::1", 27015).unwrap(),
            ServerAddress::new("2001:db8::1", 27015)
        );
        assert_eq!(ServerAddress::new("::1", 5).to_string(), "[::1]:5");
    }

    #[test]
    fn rejects_garbage() {
        assert!(ServerAddress::parse("", 1).is_err());
        assert!(ServerAddress::parse(":27015", 1).is_err());
        assert!(ServerAddress::parse("host:notaport", 1).is_err());
        assert!(ServerAddress::parse("[::1", 1).is_err());
    }

    #[test]
    fn socket_addr_both_ways() {
        let socket: SocketAddr = "127.0.0.1:27015".parse().unwrap();
        let addr = ServerAddress::from(socket);
        assert_eq!(SocketAddr::try_from(addr).unwrap(), socket);
        assert!(SocketAddr::try_from(ServerAddress::new("localhost", 1)).is_err());
    }
}
