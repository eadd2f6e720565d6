use crate::error::ServerError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1234;
const MAX_EVENTS: usize = 128;

/// Runtime settings for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Upper bound on readiness events taken from one notifier wait.
    pub max_events: usize,
    /// Watch for writable edges while a write is parked on a connection.
    pub arm_write_interest: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_events: MAX_EVENTS,
            arm_write_interest: true,
        }
    }
}

impl Config {
    /// Builds a config from the positional `host` and `port` arguments,
    /// program name already stripped. Extra arguments are ignored.
    pub fn from_args<I>(args: I) -> Result<Config, ServerError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut config = Config::default();
        if let Some(host) = args.next() {
            config.host = host;
        }
        if let Some(port) = args.next() {
            config.port = port.parse().map_err(|_| ServerError::InvalidPort(port))?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_without_arguments() {
        let config = Config::from_args(args(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 1234);
        assert_eq!(config.max_events, 128);
        assert!(config.arm_write_interest);
    }

    #[test]
    fn host_then_port() {
        let config = Config::from_args(args(&["0.0.0.0", "8080"])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);

        let config = Config::from_args(args(&["localhost"])).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn rejects_bad_port() {
        match Config::from_args(args(&["127.0.0.1", "http"])) {
            Err(ServerError::InvalidPort(port)) => assert_eq!(port, "http"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Config::from_args(args(&["127.0.0.1", "70000"])).is_err());
    }
}
