//! Application configuration.
//!
//! Loaded once from a TOML file at startup, then overridden by a few
//! environment variables. Immutable afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::notification::channels::{parse_recipients, parse_sender};
use crate::notification::{
    BatchMerger, BatchNotifier, ChannelConfig, EventEnricher, EventFilter, NotifierSettings,
    Template, local_hostname,
};
use crate::source::SourceConfig;
use crate::utils::fs::read_to_string_sync;
use crate::{Error, Result};

/// Overrides `mail.from`.
pub const ENV_MAIL_FROM: &str = "PM2_NOTIFY_MAIL_FROM";
/// Overrides `mail.to`.
pub const ENV_MAIL_TO: &str = "PM2_NOTIFY_MAIL_TO";
/// Overrides the flush interval, in milliseconds.
pub const ENV_POLLING_MS: &str = "PM2_NOTIFY_POLLING_MS";

/// Subject used when none is configured.
pub const DEFAULT_SUBJECT: &str = "[{hostname}] {process.name} {event}";

/// Body used when neither `template` nor `template_text` is set.
pub const DEFAULT_BODY: &str = "**{process.name}** {event} on {hostname} at {date}";

/// Default sender and recipient addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub to: String,
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for daily rolling log files. Console only when unset.
    pub dir: Option<PathBuf>,
    /// Filter directive, e.g. `pm2_notify=debug`.
    pub filter: Option<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Watched event kinds.
    pub events: Vec<String>,
    /// Flush interval in seconds.
    pub polling_interval_secs: u64,
    /// Flush interval in milliseconds; wins over `polling_interval_secs`.
    #[serde(alias = "polling")]
    pub polling_ms: Option<u64>,
    pub attach_logs: bool,
    /// Subject template, rendered against the oldest event of a batch.
    pub subject: String,
    /// Body template file, relative to the config file.
    pub template: Option<PathBuf>,
    /// Inline body template.
    pub template_text: Option<String>,
    /// IANA zone name for displayed timestamps. Host local time when unset.
    pub timezone: Option<String>,
    pub flush_on_shutdown: bool,
    pub mail: MailConfig,
    pub channel: ChannelConfig,
    pub source: SourceConfig,
    pub logging: LogConfig,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            events: vec!["restart".to_string(), "exit".to_string()],
            polling_interval_secs: 10,
            polling_ms: None,
            attach_logs: true,
            subject: DEFAULT_SUBJECT.to_string(),
            template: None,
            template_text: None,
            timezone: None,
            flush_on_shutdown: true,
            mail: MailConfig::default(),
            channel: ChannelConfig::default(),
            source: SourceConfig::default(),
            logging: LogConfig::default(),
            base_dir: None,
        }
    }
}

impl AppConfig {
    /// Load, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_to_string_sync("reading config", path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse without overrides or validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(from) = lookup(ENV_MAIL_FROM) {
            self.mail.from = from;
        }
        if let Some(to) = lookup(ENV_MAIL_TO) {
            self.mail.to = to;
        }
        if let Some(ms) = lookup(ENV_POLLING_MS) {
            let ms = ms
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{ENV_POLLING_MS}={ms:?}: {e}")))?;
            self.polling_ms = Some(ms);
        }
        Ok(())
    }

    /// Check everything that can be checked without reading the template.
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(Error::config("events must list at least one event kind"));
        }
        if self.events.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::config("events must not contain empty kinds"));
        }
        if self.polling_interval().is_zero() {
            return Err(Error::config("polling interval must be greater than 0"));
        }
        if self.subject.trim().is_empty() {
            return Err(Error::config("subject must not be empty"));
        }
        if self.template.is_some() && self.template_text.is_some() {
            return Err(Error::config("set either template or template_text, not both"));
        }
        if self
            .template_text
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(Error::config("template_text must not be empty"));
        }
        if self.mail.from.trim().is_empty() || self.mail.to.trim().is_empty() {
            return Err(Error::config("mail.from and mail.to must both be set"));
        }
        parse_sender(&self.mail.from)?;
        parse_recipients(&self.mail.to)?;
        self.timezone()?;
        self.channel.validate()?;
        self.source.validate()?;
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        match self.polling_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.polling_interval_secs),
        }
    }

    pub fn timezone(&self) -> Result<Option<Tz>> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|e| Error::config(format!("unknown timezone {name:?}: {e}")))
            })
            .transpose()
    }

    /// Resolved body template path, if a file is configured.
    pub fn template_path(&self) -> Option<PathBuf> {
        self.template.as_ref().map(|path| match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        })
    }

    pub fn body_template(&self) -> Result<Template> {
        let text = match (&self.template_text, self.template_path()) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => read_to_string_sync("reading body template", &path)?,
            (None, None) => DEFAULT_BODY.to_string(),
        };
        Template::parse(&text)
    }

    pub fn subject_template(&self) -> Result<Template> {
        Template::parse(&self.subject)
    }

    pub fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings {
            polling_interval: self.polling_interval(),
            flush_on_shutdown: self.flush_on_shutdown,
        }
    }

    /// Build the notifier described by this configuration.
    pub fn build_notifier(&self) -> Result<BatchNotifier> {
        let filter = EventFilter::new(self.events.iter().map(|e| e.trim().to_string()));
        let enricher = EventEnricher::new(
            local_hostname(),
            self.body_template()?,
            self.attach_logs,
            self.timezone()?,
        )?;
        let merger = BatchMerger::new(
            self.subject_template()?,
            self.mail.from.trim(),
            self.mail.to.trim(),
            self.attach_logs,
        )?;

        Ok(BatchNotifier::new(
            filter,
            enricher,
            merger,
            self.channel.build()?,
            self.notifier_settings(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
events = ["restart", "exit", "stop"]
polling = 5000
attach_logs = false
subject = "{process.name} {event}"
template = "template.md"
timezone = "Europe/Paris"

[mail]
from = "pm2@example.com"
to = "ops@example.com"

[channel]
type = "log"

[source]
type = "command"
program = "node"
args = ["bridge.js"]
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.events, vec!["restart", "exit"]);
        assert_eq!(config.polling_interval(), Duration::from_secs(10));
        assert!(config.attach_logs);
        assert!(config.flush_on_shutdown);
        assert_eq!(config.subject, DEFAULT_SUBJECT);
        assert_eq!(config.channel.channel_type(), "sendmail");
        assert_eq!(config.source, SourceConfig::Stdin);
        // Addresses have no default.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.events.len(), 3);
        assert_eq!(config.polling_interval(), Duration::from_millis(5000));
        assert!(!config.attach_logs);
        assert_eq!(config.timezone().unwrap(), Some(chrono_tz::Europe::Paris));
        assert_eq!(config.channel.channel_type(), "log");
        assert_eq!(config.source.to_string(), "command:node bridge.js");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAIL_TO, "oncall@example.com"),
            (ENV_POLLING_MS, "250"),
        ]);
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.mail.from, "pm2@example.com");
        assert_eq!(config.mail.to, "oncall@example.com");
        assert_eq!(config.polling_interval(), Duration::from_millis(250));

        let bad = config.apply_overrides(|key| (key == ENV_POLLING_MS).then(|| "soon".to_string()));
        assert!(matches!(bad, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validation_errors() {
        let valid = || AppConfig::from_toml_str(SAMPLE).unwrap();

        let mut c = valid();
        c.events.clear();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.polling_ms = Some(0);
        assert!(c.validate().is_err());

        let mut c = valid();
        c.subject = "  ".to_string();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.template_text = Some("{event}".to_string());
        assert!(c.validate().is_err());

        let mut c = valid();
        c.timezone = Some("Mars/Olympus".to_string());
        assert!(c.validate().is_err());

        let mut c = valid();
        c.mail.to.clear();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.mail.from = "pm2 at example".to_string();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.mail.to = "ops@example.com, oncall@example.com".to_string();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_smtp_channel_section() {
        let text = SAMPLE.replace(
            "[channel]\ntype = \"log\"",
            "[channel]\ntype = \"smtp\"\nsmtp_host = \"smtp.example.com\"\nsmtp_username = \"pm2\"\nsmtp_password = \"secret\"",
        );
        let config = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.channel.channel_type(), "smtp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_template_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), SAMPLE).unwrap();
        std::fs::write(
            dir.path().join("template.md"),
            "### {process.name}\n\n{event} at {date}\n",
        )
        .unwrap();

        let config = AppConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.template_path(), Some(dir.path().join("template.md")));

        let body = config.body_template().unwrap();
        assert_eq!(body.source(), "### {process.name}\n\n{event} at {date}\n");
        assert!(config.build_notifier().is_ok());
    }

    #[test]
    fn test_missing_template_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), SAMPLE).unwrap();

        let config = AppConfig::load(&dir.path().join("config.toml")).unwrap();
        let err = config.build_notifier().err().unwrap();
        assert!(err.to_string().contains("template.md"));
    }

    #[test]
    fn test_invalid_body_placeholder_fails_build() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.template = None;
        config.template_text = Some("{process.name} {nonsense}".to_string());
        assert!(matches!(
            config.build_notifier(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_default_body_builds() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.template = None;
        assert!(config.build_notifier().is_ok());
    }
}
