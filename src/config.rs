//! INI config loader, resolved against
//! `original_source/ecmread.c`'s `read_config`/`configure_socket`.
//!
//! Sections are `[Input]` or `[Connection/<Name>]`; keys are
//! case-insensitive. Unlike the source, an unrecognized `loglevel` value
//! is a parse error rather than silently ignored, and whitespace trimming
//! is proper two-sided trimming (the source's `trim` never actually
//! strips trailing whitespace).

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Crit,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Crit => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub host: Ipv4Addr,
    pub port: u16,
    pub connector: bool,
    pub controller: bool,
    pub connect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub input: Connection,
    pub peers: Vec<Connection>,
    pub log_level: LogLevel,
}

pub fn load_from_path(path: &Path) -> Result<RelayConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Open { path: path.display().to_string(), source })?;
    parse(&text)
}

#[derive(Default)]
struct ConnectionBuilder {
    name: String,
    host: Option<Ipv4Addr>,
    port: Option<u16>,
    connector: bool,
    controller: bool,
    connect_delay: u64,
}

impl ConnectionBuilder {
    fn build(self, line: usize) -> Result<Connection, ConfigError> {
        let host = self.host.ok_or_else(|| ConfigError::Parse {
            line,
            message: format!("connection '{}' is missing required key 'host'", self.name),
        })?;
        let port = self.port.ok_or_else(|| ConfigError::Parse {
            line,
            message: format!("connection '{}' is missing required key 'port'", self.name),
        })?;
        Ok(Connection {
            name: self.name,
            host,
            port,
            connector: self.connector,
            controller: self.controller,
            connect_delay: Duration::from_secs(self.connect_delay),
        })
    }
}

enum Target {
    None,
    Input,
    Peer(usize),
}

fn parse_bool(value: &str) -> Result<bool, ()> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(()),
    }
}

fn parse(text: &str) -> Result<RelayConfig, ConfigError> {
    let mut input: Option<ConnectionBuilder> = None;
    let mut peers: Vec<ConnectionBuilder> = Vec::new();
    let mut target = Target::None;
    let mut log_level = LogLevel::default();
    let mut last_line = 0usize;

    for (idx, raw_line) in text.lines().enumerate() {
        let line = idx + 1;
        last_line = line;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix('[') {
            let Some(inner) = heading.strip_suffix(']') else {
                return Err(ConfigError::Parse {
                    line,
                    message: format!("malformed section heading '{trimmed}'"),
                });
            };
            if inner.eq_ignore_ascii_case("input") {
                input = Some(ConnectionBuilder { name: "INPUT".to_string(), ..Default::default() });
                target = Target::Input;
            } else if let Some((kind, name)) = inner.split_once('/') {
                if !kind.eq_ignore_ascii_case("connection") {
                    return Err(ConfigError::Parse {
                        line,
                        message: format!("unknown section type '{kind}' in heading '{trimmed}'"),
                    });
                }
                peers.push(ConnectionBuilder { name: name.trim().to_string(), ..Default::default() });
                target = Target::Peer(peers.len() - 1);
            } else {
                return Err(ConfigError::Parse {
                    line,
                    message: format!(
                        "unknown section heading '{trimmed}', expected [Input] or [Connection/Name]"
                    ),
                });
            }
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(ConfigError::Parse {
                line,
                message: format!("malformed line '{trimmed}', expected key=value"),
            });
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "loglevel" {
            log_level = match value.to_ascii_lowercase().as_str() {
                "crit" => LogLevel::Crit,
                "warn" => LogLevel::Warn,
                "info" => LogLevel::Info,
                "debug" => LogLevel::Debug,
                other => {
                    return Err(ConfigError::Parse {
                        line,
                        message: format!("unknown loglevel '{other}'"),
                    });
                }
            };
            continue;
        }

        let builder = match &mut target {
            Target::None => {
                return Err(ConfigError::Parse {
                    line,
                    message: "key=value seen before any [section] heading".to_string(),
                });
            }
            Target::Input => input.as_mut().expect("Target::Input implies input builder exists"),
            Target::Peer(i) => &mut peers[*i],
        };

        match key.as_str() {
            "host" => {
                builder.host = Some(value.parse().map_err(|_| ConfigError::Parse {
                    line,
                    message: format!("invalid IPv4 host '{value}'"),
                })?);
            }
            "port" => {
                builder.port = Some(value.parse().map_err(|_| ConfigError::Parse {
                    line,
                    message: format!("invalid port '{value}'"),
                })?);
            }
            "connector" => {
                builder.connector = parse_bool(value).map_err(|()| ConfigError::Parse {
                    line,
                    message: format!("invalid boolean '{value}' for connector"),
                })?;
            }
            "controller" => {
                builder.controller = parse_bool(value).map_err(|()| ConfigError::Parse {
                    line,
                    message: format!("invalid boolean '{value}' for controller"),
                })?;
            }
            "connect_delay" => {
                builder.connect_delay = value.parse().map_err(|_| ConfigError::Parse {
                    line,
                    message: format!("invalid connect_delay '{value}'"),
                })?;
            }
            other => {
                return Err(ConfigError::Parse {
                    line,
                    message: format!("unknown key '{other}'"),
                });
            }
        }
    }

    let input = input.ok_or_else(|| ConfigError::Parse {
        line: last_line,
        message: "missing [Input] section".to_string(),
    })?;
    let input = input.build(last_line)?;
    let peers = peers.into_iter().map(|p| p.build(last_line)).collect::<Result<Vec<_>, _>>()?;

    let mut seen = std::collections::HashSet::new();
    for peer in &peers {
        if !seen.insert(peer.name.as_str()) {
            return Err(ConfigError::Parse {
                line: last_line,
                message: format!("duplicate connection name '{}'", peer.name),
            });
        }
    }

    Ok(RelayConfig { input, peers, log_level })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_input_and_peer() {
        let text = "\
[Input]
host=127.0.0.1
port=2000
connector=1
connect_delay=2

[Connection/listener-a]
host=127.0.0.1
port=2001
connector=0
controller=0
";
        let config = parse(text).unwrap();
        assert_eq!(config.input.host, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(config.input.port, 2000);
        assert!(config.input.connector);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].name, "listener-a");
        assert!(!config.peers[0].controller);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\
# a comment
[Input]
host=10.0.0.1
port=9000

# another comment
";
        let config = parse(text).unwrap();
        assert_eq!(config.input.host, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn unknown_key_is_rejected_with_line_number() {
        let text = "[Input]\nhost=127.0.0.1\nport=9000\nbogus=1\n";
        let err = parse(text).unwrap_err();
        match err {
            ConfigError::Parse { line, .. } => assert_eq!(line, 4),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_section_is_rejected() {
        let text = "[Bogus/Foo]\nhost=127.0.0.1\nport=9000\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn unknown_loglevel_is_rejected_not_ignored() {
        let text = "[Input]\nhost=127.0.0.1\nport=9000\nloglevel=verbose\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn duplicate_peer_names_are_rejected() {
        let text = "\
[Input]
host=127.0.0.1
port=9000

[Connection/dup]
host=127.0.0.1
port=9001

[Connection/dup]
host=127.0.0.1
port=9002
";
        let err = parse(text).unwrap_err();
        match err {
            ConfigError::Parse { message, .. } => assert!(message.contains("duplicate")),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn keys_and_section_types_are_case_insensitive() {
        let text = "[INPUT]\nHOST=127.0.0.1\nPORT=9000\nLogLevel=Debug\n";
        let config = parse(text).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
    }
}
