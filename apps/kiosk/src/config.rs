use std::{collections::BTreeMap, fs, io, path::Path, time::Duration};

use anyhow::Context;
use queue_core::{CounterLayout, DEFAULT_STORAGE_KEY};
use serde::Deserialize;
use shared::domain::{CounterId, ServiceType};

pub const DEFAULT_CONFIG_PATH: &str = "kiosk.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub storage_key: String,
    pub log_filter: String,
    pub poll_interval_ms: u64,
    /// Service letter to the counters that serve it.
    pub services: BTreeMap<String, Vec<u8>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/kiosk.db".into(),
            storage_key: DEFAULT_STORAGE_KEY.into(),
            log_filter: "info".into(),
            poll_interval_ms: 500,
            services: BTreeMap::from([("A".into(), vec![1, 2]), ("B".into(), vec![3])]),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    storage_key: Option<String>,
    log_filter: Option<String>,
    poll_interval_ms: Option<u64>,
    services: Option<BTreeMap<String, Vec<u8>>>,
}

impl Settings {
    pub fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw).context("invalid kiosk config")?;
        if let Some(v) = file_cfg.database_url {
            self.database_url = v;
        }
        if let Some(v) = file_cfg.storage_key {
            self.storage_key = v;
        }
        if let Some(v) = file_cfg.log_filter {
            self.log_filter = v;
        }
        if let Some(v) = file_cfg.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.services {
            self.services = v;
        }
        Ok(())
    }

    /// Later names win, so `APP__DATABASE_URL` beats `KIOSK_DATABASE_URL`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("KIOSK_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("APP__DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("KIOSK_STORAGE_KEY") {
            self.storage_key = v;
        }
        if let Some(v) = lookup("KIOSK_LOG") {
            self.log_filter = v;
        }
        if let Some(v) = lookup("KIOSK_POLL_MS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.poll_interval_ms = parsed,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid KIOSK_POLL_MS"),
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn layout(&self) -> anyhow::Result<CounterLayout> {
        let mut bindings = Vec::with_capacity(self.services.len());
        for (letter, numbers) in &self.services {
            let service: ServiceType = letter
                .parse()
                .with_context(|| format!("invalid service in config: '{letter}'"))?;
            let counters = numbers
                .iter()
                .map(|number| CounterId::new(*number))
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("invalid counter for service {service}"))?;
            bindings.push((service, counters));
        }
        CounterLayout::new(bindings).context("invalid counter layout")
    }
}

/// Defaults, then the config file, then the environment. A missing file is
/// only an error when its path was given explicitly.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    match fs::read_to_string(file) {
        Ok(raw) => settings
            .apply_file(&raw)
            .with_context(|| format!("failed to load '{}'", file.display()))?,
        Err(error) if error.kind() == io::ErrorKind::NotFound && path.is_none() => {}
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read '{}'", file.display()))
        }
    }

    settings.apply_env(|name| std::env::var(name).ok());
    Ok(settings)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.replace('\\', "/");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
