use std::fmt;
use std::path::PathBuf;

/// Resolved settings, built once at startup and passed by reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub downloader: DownloaderSettings,
}

/// `rabbitmq.*` section
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub vhost: String,
    pub queue: String,
}

// Keeps the password out of logs.
impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("vhost", &self.vhost)
            .field("queue", &self.queue)
            .finish()
    }
}

/// `downloader.*` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderSettings {
    /// Directory the download tool writes into
    pub path: PathBuf,
}

/// A configuration key: the environment variable that overrides it and its
/// location in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKey {
    pub env: &'static str,
    pub section: &'static str,
    pub key: &'static str,
}

impl SettingKey {
    const fn new(env: &'static str, section: &'static str, key: &'static str) -> Self {
        Self { env, section, key }
    }

    /// Dotted file path, e.g. `rabbitmq.host`
    pub fn path(&self) -> String {
        format!("{}.{}", self.section, self.key)
    }
}

pub const RABBITMQ_HOST: SettingKey = SettingKey::new("RABBITMQ_HOST", "rabbitmq", "host");
pub const RABBITMQ_PORT: SettingKey = SettingKey::new("RABBITMQ_PORT", "rabbitmq", "port");
pub const RABBITMQ_USER: SettingKey = SettingKey::new("RABBITMQ_USER", "rabbitmq", "user");
pub const RABBITMQ_PASS: SettingKey = SettingKey::new("RABBITMQ_PASS", "rabbitmq", "pass");
pub const RABBITMQ_VHOST: SettingKey = SettingKey::new("RABBITMQ_VHOST", "rabbitmq", "vhost");
pub const RABBITMQ_QUEUE: SettingKey = SettingKey::new("RABBITMQ_QUEUE", "rabbitmq", "queue");
pub const DOWNLOADER_PATH: SettingKey = SettingKey::new("DOWNLOADER_PATH", "downloader", "path");

/// Every key the application requires
pub const REQUIRED_KEYS: [SettingKey; 7] = [
    RABBITMQ_HOST,
    RABBITMQ_PORT,
    RABBITMQ_USER,
    RABBITMQ_PASS,
    RABBITMQ_VHOST,
    RABBITMQ_QUEUE,
    DOWNLOADER_PATH,
];
