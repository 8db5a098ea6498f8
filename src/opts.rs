//! Connection URLs and startup options.
//!
//! A [`ConnectionUrl`] is parsed once from an endpoint descriptor. Before a
//! connect it is flattened into a parameter dictionary, which the delegate may
//! edit, and the dictionary is then turned into the effective [`Opts`].

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// Largest valid TCP port.
pub const MAXIMUM_PORT: u16 = 65535;

const URL_SCHEMES: [&str; 3] = ["postgres", "postgresql", "pgsql"];

/// All URL schemes accepted by [`ConnectionUrl::parse`], default first.
pub fn all_url_schemes() -> &'static [&'static str] {
    &URL_SCHEMES
}

/// The scheme used when building URLs.
pub fn default_url_scheme() -> &'static str {
    URL_SCHEMES[0]
}

/// Parameter dictionary keys understood by [`Opts::from_parameters`].
pub mod key {
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const DBNAME: &str = "dbname";
    pub const SSLMODE: &str = "sslmode";
    pub const APPLICATION_NAME: &str = "application_name";
    pub const CONNECT_TIMEOUT: &str = "connect_timeout";
    pub const CLIENT_ENCODING: &str = "client_encoding";
}

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never use SSL
    Disable,
    /// Plaintext first; SSL is never requested by this client
    Allow,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL, accept any certificate
    Require,
    /// Require SSL and a certificate signed by a trusted CA
    VerifyCa,
    /// Require SSL, a trusted certificate, and a matching host name
    VerifyFull,
}

impl SslMode {
    /// Parse the `sslmode` option value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::BadUrl(format!(
                "Invalid sslmode: expected one of ['disable', 'allow', 'prefer', 'require', 'verify-ca', 'verify-full'], got {}",
                value
            ))),
        }
    }

    /// The option value for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Returns true if the session must not proceed without TLS.
    pub fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }
}

/// A parsed `postgres://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    scheme: String,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    options: Vec<(String, String)>,
}

impl ConnectionUrl {
    /// Parse a connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Recognized query parameters are validated here; unknown ones are kept
    /// and forwarded to the server as startup parameters.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| Error::BadUrl(format!("Invalid URL: {}", e)))?;
        Self::from_url(&url)
    }

    /// Build from an already parsed [`Url`].
    pub fn from_url(url: &Url) -> Result<Self> {
        if !URL_SCHEMES.contains(&url.scheme()) {
            return Err(Error::BadUrl(format!(
                "Invalid scheme: expected one of {:?}, got '{}://'",
                URL_SCHEMES,
                url.scheme()
            )));
        }

        let port = match url.port() {
            Some(0) => return Err(Error::BadUrl("port must be in 1..=65535".into())),
            Some(p) => p,
            None => DEFAULT_PORT,
        };

        let user = match url.username() {
            "" => None,
            u => Some(percent_decode(u)?),
        };
        let password = url.password().map(percent_decode).transpose()?;
        let database = match url.path().strip_prefix('/') {
            Some("") | None => None,
            Some(db) => Some(percent_decode(db)?),
        };

        let mut options = Vec::new();
        for (name, value) in url.query_pairs() {
            validate_option(&name, &value)?;
            options.push((name.into_owned(), value.into_owned()));
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or("").to_string(),
            port,
            user,
            password,
            database,
            options,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Query options in URL order.
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// Look up a query option.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Flatten into the parameter dictionary handed to the delegate before opening.
    ///
    /// Query options override values taken from the URL authority and path.
    pub fn to_parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if !self.host.is_empty() {
            params.insert(key::HOST.to_string(), self.host.clone());
        }
        params.insert(key::PORT.to_string(), self.port.to_string());
        if let Some(user) = &self.user {
            params.insert(key::USER.to_string(), user.clone());
        }
        if let Some(password) = &self.password {
            params.insert(key::PASSWORD.to_string(), password.clone());
        }
        if let Some(database) = &self.database {
            params.insert(key::DBNAME.to_string(), database.clone());
        }
        for (name, value) in &self.options {
            params.insert(name.clone(), value.clone());
        }
        params
    }
}

impl std::str::FromStr for ConnectionUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ConnectionUrl {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&String> for ConnectionUrl {
    type Error = Error;

    fn try_from(s: &String) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&Url> for ConnectionUrl {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self> {
        Self::from_url(url)
    }
}

impl TryFrom<&ConnectionUrl> for ConnectionUrl {
    type Error = Error;

    fn try_from(url: &ConnectionUrl) -> Result<Self> {
        Ok(url.clone())
    }
}

fn percent_decode(s: &str) -> Result<String> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|e| Error::BadUrl(format!("Invalid percent-encoding: {}", e)))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|e| Error::BadUrl(format!("Invalid percent-encoding: {}", e)))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| Error::BadUrl(format!("Invalid UTF-8 in URL: {}", e)))
}

fn validate_option(name: &str, value: &str) -> Result<()> {
    match name {
        key::SSLMODE => SslMode::parse(value).map(|_| ()),
        key::CONNECT_TIMEOUT => parse_timeout(value).map(|_| ()),
        key::PORT => parse_port(value).map(|_| ()),
        _ => Ok(()),
    }
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u32>() {
        Ok(p) if (1..=u32::from(MAXIMUM_PORT)).contains(&p) => Ok(p as u16),
        _ => Err(Error::BadUrl(format!(
            "Invalid port: expected 1..={}, got {}",
            MAXIMUM_PORT, value
        ))),
    }
}

fn parse_timeout(value: &str) -> Result<Option<Duration>> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::BadUrl(format!("Invalid connect_timeout: {}", value)))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Effective options for one startup handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket directory. Set when the host is an absolute path.
    ///
    /// Default: `None`
    pub socket_dir: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `$USER`, or `"postgres"`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None` (server uses the user name)
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Client encoding requested at startup.
    ///
    /// Default: `"UTF8"`
    pub client_encoding: String,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Bound on TCP connect plus the startup handshake.
    ///
    /// Default: `None`
    pub connect_timeout: Option<Duration>,

    /// Additional startup parameters forwarded verbatim.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            socket_dir: None,
            user: default_user(),
            database: None,
            password: None,
            application_name: None,
            client_encoding: "UTF8".to_string(),
            ssl_mode: SslMode::Prefer,
            connect_timeout: None,
            params: Vec::new(),
        }
    }
}

fn default_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "postgres".to_string())
}

impl Opts {
    /// Build effective options from a (possibly delegate-edited) parameter dictionary.
    pub fn from_parameters(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut opts = Opts::default();

        for (name, value) in params {
            match name.as_str() {
                key::HOST => {
                    if value.starts_with('/') {
                        opts.socket_dir = Some(value.clone());
                    } else if !value.is_empty() {
                        opts.host = value.clone();
                    }
                }
                key::PORT => opts.port = parse_port(value)?,
                key::USER => opts.user = value.clone(),
                key::PASSWORD => opts.password = Some(value.clone()),
                key::DBNAME => opts.database = Some(value.clone()),
                key::SSLMODE => opts.ssl_mode = SslMode::parse(value)?,
                key::APPLICATION_NAME => opts.application_name = Some(value.clone()),
                key::CONNECT_TIMEOUT => opts.connect_timeout = parse_timeout(value)?,
                key::CLIENT_ENCODING => opts.client_encoding = value.clone(),
                _ => opts.params.push((name.clone(), value.clone())),
            }
        }

        Ok(opts)
    }

    /// Path of the Unix socket for this endpoint, if one was requested.
    pub fn socket_path(&self) -> Option<String> {
        self.socket_dir
            .as_ref()
            .map(|dir| format!("{}/.s.PGSQL.{}", dir.trim_end_matches('/'), self.port))
    }

    /// Startup message parameters, `user` first.
    pub fn startup_params(&self) -> Vec<(&str, &str)> {
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &self.user),
            ("client_encoding", &self.client_encoding),
        ];
        if let Some(db) = &self.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.params {
            params.push((name, value));
        }
        params
    }
}

impl TryFrom<&ConnectionUrl> for Opts {
    type Error = Error;

    fn try_from(url: &ConnectionUrl) -> Result<Self> {
        Self::from_parameters(&url.to_parameters())
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::try_from(&ConnectionUrl::parse(s)?)
    }
}
