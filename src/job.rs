//! Job descriptor and its wire format
//!
//! A job travels through the queue as a JSON object:
//!
//! ```text
//! { "url": "https://...", "name": "out.mp4", "audio_only": false, "keep": false }
//! ```
//!
//! `name` is omitted when absent. Older producers emitted `null` for `name`
//! and `keep`, so `null` is accepted on the way in and read as "absent" /
//! `false`.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job url is required")]
    MissingUrl,

    #[error("invalid job url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// One media download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub audio_only: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub keep: bool,
}

impl JobDescriptor {
    /// Create a descriptor for `url`, rejecting anything that is not an
    /// absolute http(s) URL.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let job = Self {
            url: url.into().trim().to_string(),
            name: None,
            audio_only: false,
            keep: false,
        };
        job.validate()?;
        Ok(job)
    }

    /// Set the output filename. Blank names are treated as absent.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(JobError::MissingUrl);
        }

        let parsed = Url::parse(&self.url).map_err(|e| JobError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(JobError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Serialize to the queue payload. Invalid descriptors never reach the wire.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a queue payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let job: Self = serde_json::from_slice(payload)?;
        job.validate()?;
        Ok(job)
    }
}

/// Cheap prefix check used by the interactive prompt before full parsing.
pub fn has_http_scheme(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn null_as_false<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_all_fields() {
        let job = JobDescriptor::new("https://example.com/v.mp4")
            .unwrap()
            .with_name(Some("out.mp4".to_string()))
            .with_audio_only(true)
            .with_keep(true);

        let decoded = JobDescriptor::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_absent_name_is_omitted_and_stays_absent() {
        let job = JobDescriptor::new("http://example.com/a").unwrap();
        let payload = job.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("name").is_none());
        assert_eq!(value["audio_only"], json!(false));
        assert_eq!(value["keep"], json!(false));

        let decoded = JobDescriptor::from_json(&payload).unwrap();
        assert_eq!(decoded.name, None);
    }

    #[test]
    fn test_legacy_nulls_accepted() {
        let payload = br#"{"url":"https://example.com/v","name":null,"audio_only":false,"keep":null}"#;
        let job = JobDescriptor::from_json(payload).unwrap();

        assert_eq!(job.name, None);
        assert!(!job.keep);
    }

    #[test]
    fn test_unknown_keys_ignored_and_defaults_applied() {
        let payload = br#"{"url":"https://example.com/video","name":"test_video","audio":false}"#;
        let job = JobDescriptor::from_json(payload).unwrap();

        assert_eq!(job.name.as_deref(), Some("test_video"));
        assert!(!job.audio_only);
        assert!(!job.keep);
    }

    #[test]
    fn test_missing_url_is_malformed() {
        let result = JobDescriptor::from_json(br#"{"name":"x"}"#);
        assert!(matches!(result, Err(JobError::Malformed(_))));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let result = JobDescriptor::from_json(b"not json");
        assert!(matches!(result, Err(JobError::Malformed(_))));
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(JobDescriptor::new("  "), Err(JobError::MissingUrl)));
        let result = JobDescriptor::from_json(br#"{"url":""}"#);
        assert!(matches!(result, Err(JobError::MissingUrl)));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let result = JobDescriptor::new("ftp://example.com/file");
        assert!(matches!(result, Err(JobError::UnsupportedScheme(s)) if s == "ftp"));
    }

    #[test]
    fn test_relative_url_rejected() {
        let result = JobDescriptor::new("example.com/video");
        assert!(matches!(result, Err(JobError::InvalidUrl { .. })));
    }

    #[test]
    fn test_blank_name_treated_as_absent() {
        let job = JobDescriptor::new("https://example.com/v")
            .unwrap()
            .with_name(Some(" ".to_string()));
        assert_eq!(job.name, None);
    }

    #[test]
    fn test_has_http_scheme() {
        assert!(has_http_scheme("http://a"));
        assert!(has_http_scheme("https://a"));
        assert!(!has_http_scheme("ftp://a"));
        assert!(!has_http_scheme("www.example.com"));
    }
}
