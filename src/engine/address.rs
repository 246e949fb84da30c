use std::fmt;

use crate::error::QueryError;

/// A host with an optional port, as typed by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bracketed: bool = self.host.contains(':');
        match (bracketed, self.port) {
            (true, Some(port)) => write!(f, "[{}]:{}", self.host, port),
            (true, None) => write!(f, "[{}]", self.host),
            (false, Some(port)) => write!(f, "{}:{}", self.host, port),
            (false, None) => f.write_str(&self.host),
        }
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16, QueryError> {
    match port.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(QueryError::InvalidPort(format!("{:?} in {:?}", port, addr))),
    }
}

/// Split `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6 literal.
pub fn parse_address(addr: &str) -> Result<Target, QueryError> {
    let addr: &str = addr.trim();
    if addr.is_empty() {
        return Err(QueryError::InvalidAddress("address cannot be empty".to_owned()));
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| QueryError::InvalidAddress(format!("unclosed bracket in {:?}", addr)))?;
        if host.is_empty() {
            return Err(QueryError::InvalidAddress(format!("empty host in {:?}", addr)));
        }
        let port: Option<u16> = match after {
            "" => None,
            _ => match after.strip_prefix(':') {
                Some(port) => Some(parse_port(port, addr)?),
                None => {
                    return Err(QueryError::InvalidAddress(format!(
                        "unexpected {:?} after bracketed host",
                        after
                    )))
                }
            },
        };
        return Ok(Target {
            host: host.to_owned(),
            port,
        });
    }

    match addr.matches(':').count() {
        0 => Ok(Target {
            host: addr.to_owned(),
            port: None,
        }),
        1 => {
            let (host, port) = addr
                .split_once(':')
                .ok_or_else(|| QueryError::InvalidAddress(addr.to_owned()))?;
            if host.is_empty() {
                return Err(QueryError::InvalidAddress(format!("empty host in {:?}", addr)));
            }
            Ok(Target {
                host: host.to_owned(),
                port: Some(parse_port(port, addr)?),
            })
        }
        // unbracketed IPv6 literal, which cannot carry a port
        _ => Ok(Target {
            host: addr.to_owned(),
            port: None,
        }),
    }
}
