use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub history_limit: usize,
    pub progress_interval: Duration,
    pub idle_disconnect_after: Duration,
    pub previous_restart_threshold: Duration,

    // Descargas
    pub downloads_dir: PathBuf,
    pub ytdlp_path: String,
    pub cleanup_retries: u32,
    pub cleanup_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Crear el directorio de descargas si no existe
        std::fs::create_dir_all(&config.downloads_dir)
            .with_context(|| format!("No se pudo crear {}", config.downloads_dir.display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables (el entorno en
    /// producción, un mapa en tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            default_volume: parse_or(&lookup, "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_or(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            history_limit: parse_or(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            progress_interval: duration_or(&lookup, "PROGRESS_INTERVAL", defaults.progress_interval)?,
            idle_disconnect_after: duration_or(&lookup, "IDLE_DISCONNECT_AFTER", defaults.idle_disconnect_after)?,
            previous_restart_threshold: duration_or(
                &lookup,
                "PREVIOUS_RESTART_THRESHOLD",
                defaults.previous_restart_threshold,
            )?,

            downloads_dir: lookup("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            cleanup_retries: parse_or(&lookup, "CLEANUP_RETRIES", defaults.cleanup_retries)?,
            cleanup_delay: duration_or(&lookup, "CLEANUP_DELAY", defaults.cleanup_delay)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue and history limits must be greater than 0
    /// - The progress interval and the cleanup budget must not be zero
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.history_limit == 0 {
            anyhow::bail!("History limit must be greater than 0");
        }

        if self.progress_interval.is_zero() {
            anyhow::bail!("Progress interval must be greater than 0");
        }

        if self.cleanup_retries == 0 {
            anyhow::bail!("Cleanup retries must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The bot token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol, {} queue, {} history\n  \
            Timers: progress every {}, idle disconnect after {}, previous restarts after {}\n  \
            Downloads: {} via {} (cleanup {}x every {})",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.history_limit,
            humantime::format_duration(self.progress_interval),
            humantime::format_duration(self.idle_disconnect_after),
            humantime::format_duration(self.previous_restart_threshold),
            self.downloads_dir.display(),
            self.ytdlp_path,
            self.cleanup_retries,
            humantime::format_duration(self.cleanup_delay),
        )
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn duration_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .with_context(|| format!("{} inválido: {:?} (ej. \"10s\", \"1500ms\")", key, raw)),
        _ => Ok(default),
    }
}

/// Valores por defecto usados cuando una variable no está definida.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valores por defecto, deben proveerse)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 0.3,
            max_queue_size: 1000,
            history_limit: 50,
            progress_interval: Duration::from_secs(10),
            idle_disconnect_after: Duration::from_secs(120),
            previous_restart_threshold: Duration::from_secs(5),

            downloads_dir: "./downloads".into(),
            ytdlp_path: "yt-dlp".to_string(),
            cleanup_retries: 15,
            cleanup_delay: Duration::from_millis(1500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "t"), ("APPLICATION_ID", "123")])).unwrap();

        assert_eq!(config.application_id, 123);
        assert_eq!(config.default_volume, 0.3);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.progress_interval, Duration::from_secs(10));
        assert_eq!(config.idle_disconnect_after, Duration::from_secs(120));
        assert_eq!(config.cleanup_retries, 15);
        assert_eq!(config.cleanup_delay, Duration::from_millis(1500));
        assert_eq!(config.ytdlp_path, "yt-dlp");
    }

    #[test]
    fn durations_use_humantime_syntax() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("APPLICATION_ID", "1"),
            ("PROGRESS_INTERVAL", "5s"),
            ("IDLE_DISCONNECT_AFTER", "2m"),
            ("CLEANUP_DELAY", "250ms"),
        ]))
        .unwrap();

        assert_eq!(config.progress_interval, Duration::from_secs(5));
        assert_eq!(config.idle_disconnect_after, Duration::from_secs(120));
        assert_eq!(config.cleanup_delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_missing_token_and_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("APPLICATION_ID", "1")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("APPLICATION_ID", "1"),
            ("DEFAULT_VOLUME", "3.5"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "t"),
            ("APPLICATION_ID", "1"),
            ("PROGRESS_INTERVAL", "diez"),
        ]))
        .is_err());
    }

    #[test]
    fn summary_hides_the_token() {
        let config = Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "secreto"), ("APPLICATION_ID", "1")])).unwrap();
        let summary = config.summary();
        assert!(!summary.contains("secreto"));
        assert!(summary.contains("30% vol"));
    }
}
