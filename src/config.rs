use std::{env, net::SocketAddr, time::Duration};

use axum::http::{HeaderName, HeaderValue, Method};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub mcp_endpoint: String,
    pub api_token: Option<String>,
    pub request_timeout: Option<Duration>,
    pub cors: CorsConfig,
}

/// Static CORS policy applied to every HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct CorsConfig {
    /// `None` allows any origin.
    pub allow_origins: Option<Vec<HeaderValue>>,
    pub allow_methods: Vec<Method>,
    pub allow_headers: Vec<HeaderName>,
    pub allow_credentials: bool,
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: None,
            allow_methods: vec![Method::GET, Method::POST, Method::OPTIONS],
            allow_headers: vec![
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("accept"),
            ],
            allow_credentials: false,
            max_age: Duration::from_secs(86_400),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_ENDPOINT must start with `/`")]
    InvalidEndpoint,
    #[error("MCP_REQUEST_TIMEOUT_MS must be a positive integer")]
    InvalidRequestTimeout,
    #[error("MCP_CORS_ALLOW_ORIGIN contains an invalid origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("MCP_CORS_ALLOW_METHODS contains an invalid method: {0}")]
    InvalidCorsMethod(String),
    #[error("MCP_CORS_ALLOW_HEADERS contains an invalid header: {0}")]
    InvalidCorsHeader(String),
    #[error("MCP_CORS_ALLOW_CREDENTIALS must be true or false")]
    InvalidCorsCredentials,
    #[error("MCP_CORS_MAX_AGE_SECS must be a non-negative integer")]
    InvalidCorsMaxAge,
    #[error("MCP_CORS_ALLOW_CREDENTIALS cannot be combined with a wildcard origin")]
    CredentialsWithWildcardOrigin,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = var("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let mcp_endpoint = var("MCP_ENDPOINT").unwrap_or_else(|| "/mcp".to_string());
        if !mcp_endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint);
        }
        let request_timeout = var("MCP_REQUEST_TIMEOUT_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .map(Duration::from_millis)
                    .ok_or(ConfigError::InvalidRequestTimeout)
            })
            .transpose()?;

        let config = Self {
            bind_addr,
            bind_port,
            mcp_endpoint,
            api_token: var("MCP_API_TOKEN"),
            request_timeout,
            cors: CorsConfig::from_lookup(var)?,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

impl CorsConfig {
    fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let allow_origins = match var("MCP_CORS_ALLOW_ORIGIN").as_deref() {
            None | Some("*") => None,
            Some(origins) => Some(
                split_list(origins)
                    .map(|origin| {
                        HeaderValue::from_str(origin)
                            .map_err(|_| ConfigError::InvalidCorsOrigin(origin.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        let allow_methods = match var("MCP_CORS_ALLOW_METHODS") {
            None => defaults.allow_methods,
            Some(methods) => split_list(&methods)
                .map(|method| {
                    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                        .map_err(|_| ConfigError::InvalidCorsMethod(method.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let allow_headers = match var("MCP_CORS_ALLOW_HEADERS") {
            None => defaults.allow_headers,
            Some(headers) => split_list(&headers)
                .map(|header| {
                    HeaderName::from_bytes(header.as_bytes())
                        .map_err(|_| ConfigError::InvalidCorsHeader(header.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let allow_credentials = match var("MCP_CORS_ALLOW_CREDENTIALS")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("false") => false,
            Some("true") => true,
            Some(_) => return Err(ConfigError::InvalidCorsCredentials),
        };
        if allow_credentials && allow_origins.is_none() {
            return Err(ConfigError::CredentialsWithWildcardOrigin);
        }

        let max_age = var("MCP_CORS_MAX_AGE_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidCorsMaxAge)
            })
            .transpose()?
            .unwrap_or(defaults.max_age);

        Ok(Self {
            allow_origins,
            allow_methods,
            allow_headers,
            allow_credentials,
            max_age,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = parse(&[]).expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.mcp_endpoint, "/mcp");
        assert_eq!(config.api_token, None);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.cors, CorsConfig::default());
    }

    #[test]
    fn blank_token_is_treated_as_unset() {
        let config = parse(&[("MCP_API_TOKEN", "   ")]).expect("config should parse");
        assert_eq!(config.api_token, None);

        let config = parse(&[("MCP_API_TOKEN", " abc ")]).expect("config should parse");
        assert_eq!(config.api_token.as_deref(), Some("abc"));
    }

    #[test]
    fn invalid_port_fails() {
        let err = parse(&[("BIND_PORT", "99999")]).expect_err("expected invalid port error");
        assert_eq!(err, ConfigError::InvalidPort);
    }

    #[test]
    fn invalid_bind_addr_fails() {
        let err = parse(&[("BIND_ADDR", "not an address")]).expect_err("expected socket error");
        assert_eq!(err, ConfigError::InvalidSocket);
    }

    #[test]
    fn request_timeout_must_be_positive() {
        let config = parse(&[("MCP_REQUEST_TIMEOUT_MS", "1500")]).expect("config should parse");
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));

        let err = parse(&[("MCP_REQUEST_TIMEOUT_MS", "0")]).expect_err("zero must fail");
        assert_eq!(err, ConfigError::InvalidRequestTimeout);
    }

    #[test]
    fn endpoint_must_be_absolute() {
        let err = parse(&[("MCP_ENDPOINT", "mcp")]).expect_err("relative endpoint must fail");
        assert_eq!(err, ConfigError::InvalidEndpoint);
    }

    #[test]
    fn cors_lists_are_parsed() {
        let config = parse(&[
            ("MCP_CORS_ALLOW_ORIGIN", "https://a.example, https://b.example"),
            ("MCP_CORS_ALLOW_METHODS", "post, options"),
            ("MCP_CORS_ALLOW_HEADERS", "Content-Type, X-Payment"),
            ("MCP_CORS_ALLOW_CREDENTIALS", "true"),
            ("MCP_CORS_MAX_AGE_SECS", "600"),
        ])
        .expect("config should parse");

        assert_eq!(
            config.cors.allow_origins,
            Some(vec![
                HeaderValue::from_static("https://a.example"),
                HeaderValue::from_static("https://b.example"),
            ])
        );
        assert_eq!(config.cors.allow_methods, vec![Method::POST, Method::OPTIONS]);
        assert_eq!(
            config.cors.allow_headers,
            vec![
                HeaderName::from_static("content-type"),
                HeaderName::from_static("x-payment"),
            ]
        );
        assert!(config.cors.allow_credentials);
        assert_eq!(config.cors.max_age, Duration::from_secs(600));
    }

    #[test]
    fn credentials_with_wildcard_origin_fail() {
        let err = parse(&[("MCP_CORS_ALLOW_CREDENTIALS", "true")])
            .expect_err("credentials with * must fail");
        assert_eq!(err, ConfigError::CredentialsWithWildcardOrigin);
    }

    #[test]
    fn invalid_cors_header_fails() {
        let err = parse(&[("MCP_CORS_ALLOW_HEADERS", "bad header")])
            .expect_err("header with space must fail");
        assert_eq!(err, ConfigError::InvalidCorsHeader("bad header".to_string()));
    }
}
