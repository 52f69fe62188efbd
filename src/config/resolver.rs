use super::models::{
    BrokerSettings, DOWNLOADER_PATH, DownloaderSettings, RABBITMQ_HOST, RABBITMQ_PASS,
    RABBITMQ_PORT, RABBITMQ_QUEUE, RABBITMQ_USER, RABBITMQ_VHOST, SettingKey, Settings,
};
use super::sources::{EnvSource, FileSource};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Missing configuration for {section}.{key}")]
    Missing {
        section: &'static str,
        key: &'static str,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Environment-first, file-fallback lookup of individual keys
pub struct Resolver<'a> {
    env: &'a EnvSource,
    file: &'a FileSource,
}

impl<'a> Resolver<'a> {
    pub fn new(env: &'a EnvSource, file: &'a FileSource) -> Self {
        Self { env, file }
    }

    /// The environment value if set and non-empty, else the file value.
    pub fn lookup(&self, key: SettingKey) -> Result<String, ResolverError> {
        if let Some(value) = self.env.get(key.env) {
            return Ok(value.to_string());
        }

        self.file
            .get(key.section, key.key)
            .ok_or(ResolverError::Missing {
                section: key.section,
                key: key.key,
            })
    }

    fn lookup_port(&self, key: SettingKey) -> Result<u16, ResolverError> {
        let raw = self.lookup(key)?;
        raw.trim().parse().map_err(|e| ResolverError::Invalid {
            key: key.path(),
            reason: format!("'{}' is not a valid port ({})", raw, e),
        })
    }

    /// Resolve every required key into [`Settings`]
    pub fn settings(&self) -> Result<Settings, ResolverError> {
        let broker = BrokerSettings {
            host: self.lookup(RABBITMQ_HOST)?,
            port: self.lookup_port(RABBITMQ_PORT)?,
            user: self.lookup(RABBITMQ_USER)?,
            pass: self.lookup(RABBITMQ_PASS)?,
            vhost: self.lookup(RABBITMQ_VHOST)?,
            queue: self.lookup(RABBITMQ_QUEUE)?,
        };

        let downloader = DownloaderSettings {
            path: PathBuf::from(self.lookup(DOWNLOADER_PATH)?),
        };

        Ok(Settings { broker, downloader })
    }
}

#[cfg(test)]
mod tests {
    use super::super::models::REQUIRED_KEYS;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FULL_YAML: &str = r#"
rabbitmq:
  host: localhost
  port: 5672
  user: guest
  pass: guest
  vhost: /
  queue: downloads
downloader:
  path: /tmp/downloads
"#;

    fn file_source(contents: &str) -> (TempDir, FileSource) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, contents).unwrap();
        let source = FileSource::load(&path).unwrap();
        (temp_dir, source)
    }

    #[test]
    fn test_file_only() {
        let (_dir, file) = file_source(FULL_YAML);
        let env = EnvSource::default();

        let settings = Resolver::new(&env, &file).settings().unwrap();
        assert_eq!(settings.broker.host, "localhost");
        assert_eq!(settings.broker.port, 5672);
        assert_eq!(settings.broker.vhost, "/");
        assert_eq!(settings.broker.queue, "downloads");
        assert_eq!(settings.downloader.path, PathBuf::from("/tmp/downloads"));
    }

    #[test]
    fn test_env_wins_for_every_key() {
        let (_dir, file) = file_source(FULL_YAML);

        for key in REQUIRED_KEYS {
            let override_value = if key == RABBITMQ_PORT { "15672" } else { "from-env" };
            let env = EnvSource::from_pairs([(key.env, override_value)]);
            let resolver = Resolver::new(&env, &file);

            assert_eq!(resolver.lookup(key).unwrap(), override_value, "{}", key.env);
        }
    }

    #[test]
    fn test_cleared_env_falls_back_to_file() {
        let (_dir, file) = file_source(FULL_YAML);
        let env = EnvSource::from_pairs([("RABBITMQ_QUEUE", "")]);

        let resolver = Resolver::new(&env, &file);
        assert_eq!(resolver.lookup(RABBITMQ_QUEUE).unwrap(), "downloads");
    }

    #[test]
    fn test_missing_everywhere_names_section_and_key() {
        let env = EnvSource::default();
        let file = FileSource::empty();

        for key in REQUIRED_KEYS {
            let err = Resolver::new(&env, &file).lookup(key).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Missing configuration for {}.{}", key.section, key.key)
            );
        }
    }

    #[test]
    fn test_env_only() {
        let env = EnvSource::from_pairs([
            ("RABBITMQ_HOST", "rabbit"),
            ("RABBITMQ_PORT", "5673"),
            ("RABBITMQ_USER", "worker"),
            ("RABBITMQ_PASS", "secret"),
            ("RABBITMQ_VHOST", "media"),
            ("RABBITMQ_QUEUE", "jobs"),
            ("DOWNLOADER_PATH", "/srv/media"),
        ]);
        let file = FileSource::empty();

        let settings = Resolver::new(&env, &file).settings().unwrap();
        assert_eq!(settings.broker.host, "rabbit");
        assert_eq!(settings.broker.port, 5673);
        assert_eq!(settings.broker.vhost, "media");
    }

    #[test]
    fn test_invalid_port() {
        let (_dir, file) = file_source(FULL_YAML);
        let env = EnvSource::from_pairs([("RABBITMQ_PORT", "amqp")]);

        let result = Resolver::new(&env, &file).settings();
        assert!(matches!(
            result,
            Err(ResolverError::Invalid { ref key, .. }) if key == "rabbitmq.port"
        ));
    }
}
