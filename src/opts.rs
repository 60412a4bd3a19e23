//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Username for authentication.
    ///
    /// Default: `"postgres"`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `Some("postgres")`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// How long to wait for each server message before the connection is
    /// declared broken.
    ///
    /// Default: `30s`
    pub response_timeout: Duration,

    /// Backend messages buffered between the receive loop and the engine.
    ///
    /// Default: `256`
    pub response_capacity: usize,

    /// Request bundles buffered between the engine and the send loop.
    ///
    /// Default: `64`
    pub request_capacity: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            database: Some("postgres".to_string()),
            password: None,
            application_name: None,
            params: Vec::new(),
            response_timeout: Duration::from_secs(30),
            response_capacity: 256,
            request_capacity: 64,
        }
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `application_name`: application name
    /// - `response_timeout`: `500ms`, `5s`, `2m` or a bare number of seconds
    /// - `response_capacity`, `request_capacity`: positive integers
    ///
    /// Any other parameter is forwarded to the server in the startup packet.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let defaults = Opts::default();
        let mut opts = Opts {
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .unwrap_or(defaults.host.clone()),
            port: url.port().unwrap_or(defaults.port),
            user: if url.username().is_empty() {
                defaults.user.clone()
            } else {
                url.username().to_string()
            },
            password: url.password().map(|s| s.to_string()),
            database: match url.path().strip_prefix('/') {
                Some(s) if !s.is_empty() => Some(s.to_string()),
                _ => defaults.database.clone(),
            },
            ..defaults
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "response_timeout" => {
                    opts.response_timeout = parse_duration(&value).ok_or_else(|| {
                        Error::InvalidUsage(format!("Invalid response_timeout: {}", value))
                    })?;
                }
                "response_capacity" => {
                    opts.response_capacity = parse_capacity("response_capacity", &value)?;
                }
                "request_capacity" => {
                    opts.request_capacity = parse_capacity("request_capacity", &value)?;
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

fn parse_capacity(name: &str, value: &str) -> Result<usize, Error> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", name, value))),
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.parse().ok().map(Duration::from_secs);
    }
    if let Some(m) = value.strip_suffix('m') {
        return m.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    value.parse().ok().map(Duration::from_secs)
}
