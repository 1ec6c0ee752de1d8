use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Attachment ingest settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub public_prefix: String,
    /// Payloads strictly larger than this are rejected
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
}

// Room for the JSON fields around a base64 upload
const FRAME_ENVELOPE_BYTES: usize = 64 * 1024;

impl UploadConfig {
    /// Largest live channel frame to accept: an `uploadMessage` carrying a
    /// file of exactly `max_bytes`, base64 encoded, plus its envelope.
    /// Anything larger cannot be a valid upload.
    pub fn max_frame_size(&self) -> usize {
        self.max_bytes.div_ceil(3) * 4 + FRAME_ENVELOPE_BYTES
    }
}

/// Live channel keepalive settings
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` selects the in-memory store
    pub database_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub upload: UploadConfig,
    pub io_timeout: Duration,
    pub websocket: WebSocketConfig,
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{name} is not a valid number: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        let port = Self::parse_var("PORT", 3000u16)?;
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let upload = UploadConfig {
            dir: PathBuf::from(env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into())),
            public_prefix: env::var("UPLOAD_PUBLIC_PREFIX")
                .unwrap_or_else(|_| "/uploads".into())
                .trim_end_matches('/')
                .to_string(),
            max_bytes: Self::parse_var("UPLOAD_MAX_BYTES", 10 * 1024 * 1024usize)?,
            allowed_extensions: Self::parse_list(
                &env::var("UPLOAD_ALLOWED_EXTENSIONS")
                    .unwrap_or_else(|_| "jpeg,jpg,png,pdf,mp4,webm".into()),
            ),
            allowed_mime_types: Self::parse_list(&env::var("UPLOAD_ALLOWED_MIME_TYPES").unwrap_or_else(
                |_| "image/jpeg,image/png,application/pdf,video/mp4,video/webm".into(),
            )),
        };

        let io_timeout = Duration::from_millis(Self::parse_var("IO_TIMEOUT_MS", 5000u64)?);

        let websocket = WebSocketConfig {
            heartbeat_interval: Duration::from_secs(Self::parse_var(
                "WS_HEARTBEAT_INTERVAL_SECS",
                5u64,
            )?),
            client_timeout: Duration::from_secs(Self::parse_var("WS_CLIENT_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Self {
            database_url,
            port,
            jwt_secret,
            upload,
            io_timeout,
            websocket,
        })
    }

    /// In-memory configuration for tests; uploads land in `upload_dir`
    pub fn test_defaults(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_url: None,
            port: 0,
            jwt_secret: "test-secret".into(),
            upload: UploadConfig {
                dir: upload_dir.into(),
                public_prefix: "/uploads".into(),
                max_bytes: 10 * 1024 * 1024,
                allowed_extensions: Self::parse_list("jpeg,jpg,png,pdf,mp4,webm"),
                allowed_mime_types: Self::parse_list(
                    "image/jpeg,image/png,application/pdf,video/mp4,video/webm",
                ),
            },
            io_timeout: Duration::from_secs(5),
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
            },
        }
    }
}
