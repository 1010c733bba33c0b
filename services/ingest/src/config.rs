//! Service configuration loading.
//!
//! TOML is the sole config source; `RUST_LOG` may override the configured
//! log level but nothing else comes from the environment.  Default config
//! path: `/etc/rtms/ingest.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - A `[credentials]` shorthand or at least one `[credentials.<product>]`
//!   table with `client_id`, `client_secret`, `secret_token`
//!
//! Everything else has defaults.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (validated)
// ---------------------------------------------------------------------------

/// Product line a stream belongs to.  Webhook event prefixes map onto this
/// (`session.rtms_started` is the video SDK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    Meeting,
    Webinar,
    VideoSdk,
    ContactCenter,
    Phone,
}

impl ProductKind {
    pub const ALL: [ProductKind; 5] = [
        ProductKind::Meeting,
        ProductKind::Webinar,
        ProductKind::VideoSdk,
        ProductKind::ContactCenter,
        ProductKind::Phone,
    ];

    /// The `<product>` segment of webhook event names.
    pub fn event_prefix(self) -> &'static str {
        match self {
            ProductKind::Meeting => "meeting",
            ProductKind::Webinar => "webinar",
            ProductKind::VideoSdk => "session",
            ProductKind::ContactCenter => "contactcenter",
            ProductKind::Phone => "phone",
        }
    }

    pub fn from_event_prefix(prefix: &str) -> Option<ProductKind> {
        ProductKind::ALL
            .into_iter()
            .find(|p| p.event_prefix() == prefix)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductKind::Meeting => "meeting",
            ProductKind::Webinar => "webinar",
            ProductKind::VideoSdk => "videoSdk",
            ProductKind::ContactCenter => "contactCenter",
            ProductKind::Phone => "phone",
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product's credential record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub secret_token: String,
}

/// Per-product credentials with the `meeting` record as the fallback.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    records: HashMap<ProductKind, Credentials>,
}

impl CredentialSet {
    pub fn insert(&mut self, product: ProductKind, creds: Credentials) {
        self.records.insert(product, creds);
    }

    /// Resolve credentials for a product, falling back to `meeting`.
    pub fn resolve(&self, product: ProductKind) -> Option<&Credentials> {
        self.records
            .get(&product)
            .or_else(|| self.records.get(&ProductKind::Meeting))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Log level knob; `off` by default, overridable via `RUST_LOG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    fn parse(s: &str) -> Option<LogLevel> {
        match s {
            "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub schema_version: u32,
    pub log_level: LogLevel,
    pub http: HttpConfig,
    pub media: MediaConfig,
    pub credentials: CredentialSet,
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Raw subscription mask; may carry the all-media sentinel (32).
    pub subscribe: u8,
    /// Filler vs passthrough; a startup choice, not a per-frame branch.
    pub fillers: bool,
    pub audio_send_rate_ms: u32,
    pub video_fps: u32,
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    log_level: Option<String>,
    http: Option<RawHttpConfig>,
    media: Option<RawMediaConfig>,
    credentials: Option<RawCredentialsTable>,
    inference: Option<RawInferenceConfig>,
}

#[derive(Debug, Deserialize)]
struct RawHttpConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMediaConfig {
    subscribe: Option<u8>,
    fillers: Option<bool>,
    audio_send_rate_ms: Option<u32>,
    video_fps: Option<u32>,
}

/// `[credentials]` doubles as the all-products shorthand and as the parent
/// of per-product tables, so all fields are optional at parse time.
#[derive(Debug, Deserialize)]
struct RawCredentialsTable {
    client_id: Option<String>,
    client_secret: Option<String>,
    secret_token: Option<String>,
    meeting: Option<RawCredentials>,
    webinar: Option<RawCredentials>,
    videosdk: Option<RawCredentials>,
    contactcenter: Option<RawCredentials>,
    phone: Option<RawCredentials>,
}

#[derive(Debug, Deserialize)]
struct RawCredentials {
    client_id: Option<String>,
    client_secret: Option<String>,
    secret_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInferenceConfig {
    base_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<IngestConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load from the default path `/etc/rtms/ingest.toml`.
pub fn load_config() -> Result<IngestConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/rtms/ingest.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<IngestConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let log_level = match raw.log_level {
        None => LogLevel::Off,
        Some(s) => LogLevel::parse(&s).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "log_level must be one of off|error|warn|info|debug, got '{s}'"
            ))
        })?,
    };

    let http = HttpConfig {
        bind: raw
            .http
            .and_then(|h| h.bind)
            .unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
    };

    let media = match raw.media {
        Some(m) => MediaConfig {
            subscribe: m.subscribe.unwrap_or(rtms_protocol::media::ALL_MEDIA),
            fillers: m.fillers.unwrap_or(false),
            audio_send_rate_ms: m.audio_send_rate_ms.unwrap_or(20),
            video_fps: m.video_fps.unwrap_or(25),
        },
        None => MediaConfig {
            subscribe: rtms_protocol::media::ALL_MEDIA,
            fillers: false,
            audio_send_rate_ms: 20,
            video_fps: 25,
        },
    };
    if media.subscribe == 0 {
        return Err(ConfigError::InvalidValue(
            "media.subscribe must include at least one media type".to_owned(),
        ));
    }

    let credentials = build_credentials(raw.credentials)?;
    if credentials.is_empty() {
        return Err(ConfigError::MissingField("credentials".to_owned()));
    }

    let inference = match raw.inference {
        None => None,
        Some(i) => Some(InferenceConfig {
            base_url: i
                .base_url
                .ok_or_else(|| ConfigError::MissingField("inference.base_url".to_owned()))?,
        }),
    };

    Ok(IngestConfig {
        schema_version,
        log_level,
        http,
        media,
        credentials,
        inference,
    })
}

fn build_credentials(raw: Option<RawCredentialsTable>) -> Result<CredentialSet, ConfigError> {
    let mut set = CredentialSet::default();
    let Some(table) = raw else {
        return Ok(set);
    };

    // Shorthand: bare keys on [credentials] apply to every product.
    if table.client_id.is_some() || table.client_secret.is_some() || table.secret_token.is_some() {
        let creds = validate_credentials(
            "credentials",
            RawCredentials {
                client_id: table.client_id.clone(),
                client_secret: table.client_secret.clone(),
                secret_token: table.secret_token.clone(),
            },
        )?;
        for product in ProductKind::ALL {
            set.insert(product, creds.clone());
        }
    }

    let per_product = [
        (ProductKind::Meeting, "meeting", table.meeting),
        (ProductKind::Webinar, "webinar", table.webinar),
        (ProductKind::VideoSdk, "videosdk", table.videosdk),
        (ProductKind::ContactCenter, "contactcenter", table.contactcenter),
        (ProductKind::Phone, "phone", table.phone),
    ];
    for (product, key, raw) in per_product {
        if let Some(raw) = raw {
            let field = format!("credentials.{key}");
            set.insert(product, validate_credentials(&field, raw)?);
        }
    }
    Ok(set)
}

fn validate_credentials(field: &str, raw: RawCredentials) -> Result<Credentials, ConfigError> {
    Ok(Credentials {
        client_id: raw
            .client_id
            .ok_or_else(|| ConfigError::MissingField(format!("{field}.client_id")))?,
        client_secret: raw
            .client_secret
            .ok_or_else(|| ConfigError::MissingField(format!("{field}.client_secret")))?,
        secret_token: raw
            .secret_token
            .ok_or_else(|| ConfigError::MissingField(format!("{field}.secret_token")))?,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
