//! Upstream endpoint resolution.

use axum::http::uri::{Authority, PathAndQuery, Scheme as UriScheme};
use axum::http::{HeaderValue, Uri};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;

/// Errors resolving the configured base URI.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid base URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("base URI '{0}' has no host")]
    MissingHost(String),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(#[from] axum::http::Error),
}

/// Plain or encrypted transport to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plain,
    Encrypted,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Plain => 80,
            Scheme::Encrypted => 443,
        }
    }

    fn as_uri_scheme(self) -> UriScheme {
        match self {
            Scheme::Plain => UriScheme::HTTP,
            Scheme::Encrypted => UriScheme::HTTPS,
        }
    }
}

/// HTTP basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The upstream reporting service, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEndpoint {
    host: String,
    port: u16,
    scheme: Scheme,
    credentials: Credentials,
}

impl UpstreamEndpoint {
    /// Resolve `base_uri`. Any path in it is ignored.
    pub fn parse(base_uri: &str, credentials: Credentials) -> Result<Self, EndpointError> {
        let url = Url::parse(base_uri).map_err(|source| EndpointError::InvalidUri {
            uri: base_uri.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Plain,
            "https" => Scheme::Encrypted,
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(base_uri.to_string()))?
            .to_string();

        Ok(Self {
            host,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            scheme,
            credentials,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, EndpointError> {
        Self::parse(
            &config.base_uri,
            Credentials {
                user: config.username.clone(),
                password: config.password.clone(),
            },
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `host:port` as sent in the `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute URI for `path_and_query` on this endpoint.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, EndpointError> {
        let authority = Authority::try_from(self.authority().as_str())
            .map_err(axum::http::Error::from)?;
        let path_and_query =
            PathAndQuery::try_from(path_and_query).map_err(axum::http::Error::from)?;

        Ok(Uri::builder()
            .scheme(self.scheme.as_uri_scheme())
            .authority(authority)
            .path_and_query(path_and_query)
            .build()?)
    }

    /// `Authorization` header value carrying the basic credentials.
    pub fn authorization(&self) -> HeaderValue {
        let token = STANDARD.encode(format!(
            "{}:{}",
            self.credentials.user, self.credentials.password
        ));
        let mut value = HeaderValue::try_from(format!("Basic {}", token))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        value.set_sensitive(true);
        value
    }
}
