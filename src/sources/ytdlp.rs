use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, SourceResolver};
use crate::audio::{acquirer::MediaDownloader, error::AcquisitionError, track::TrackRef};

/// Peticiones concurrentes a yt-dlp, para evitar rate limiting del sitio.
const MAX_CONCURRENT: usize = 3;

/// Cliente de yt-dlp: resuelve enlaces o búsquedas y descarga el audio a disco.
pub struct YtDlpClient {
    binary: String,
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp con `--dump-json`.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    is_live: Option<bool>,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(MAX_CONCURRENT),
        }
    }

    /// Verifica que el ejecutable responde y devuelve su versión.
    pub async fn verify_dependencies(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("No se pudo ejecutar {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version terminó con {}", self.binary, output.status);
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    async fn run(&self, args: &[&str]) -> Result<String, String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| e.to_string())?;

        debug!("yt-dlp {}", args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("Error al ejecutar yt-dlp: {}", e))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Convierte una línea de `--dump-json` en un [`TrackRef`].
fn parse_info(json: &str) -> Result<TrackRef, AcquisitionError> {
    let info: YtDlpInfo = serde_json::from_str(json)
        .map_err(|e| AcquisitionError::Resolve(format!("respuesta de yt-dlp inválida: {}", e)))?;

    let playable = info
        .url
        .ok_or_else(|| AcquisitionError::Resolve("yt-dlp no devolvió una URL reproducible".to_string()))?;
    let original = info
        .webpage_url
        .or(info.original_url)
        .unwrap_or_else(|| playable.clone());
    let title = info.title.unwrap_or_else(|| "Desconocido".to_string());

    let mut track = TrackRef::remote(title, playable, original).with_headers(info.http_headers);
    if let Some(id) = info.id {
        track = track.with_stable_id(id);
    }
    // Los directos no tienen duración fija.
    if let Some(seconds) = info.duration.filter(|_| !info.is_live.unwrap_or(false)) {
        if seconds.is_finite() && seconds > 0.0 {
            track = track.with_duration(Duration::from_secs_f64(seconds));
        }
    }
    Ok(track)
}

#[async_trait]
impl SourceResolver for YtDlpClient {
    async fn resolve(&self, query: &str) -> Result<TrackRef, AcquisitionError> {
        let target = if is_url(query) {
            query.to_string()
        } else {
            info!("🔍 Buscando: {}", query);
            format!("ytsearch1:{}", query)
        };

        let stdout = self
            .run(&[
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--dump-json",
                "--no-warnings",
                &target,
            ])
            .await
            .map_err(AcquisitionError::Resolve)?;

        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| AcquisitionError::Resolve(format!("sin resultados para {}", query)))?;

        parse_info(line)
    }
}

#[async_trait]
impl MediaDownloader for YtDlpClient {
    async fn download(&self, track: &TrackRef, dir: &Path, stem: &str) -> Result<PathBuf, AcquisitionError> {
        let url = track.original_location();
        let template = dir.join(format!("{}.%(ext)s", stem));
        let template = template.to_string_lossy();

        let stdout = self
            .run(&[
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--no-warnings",
                "--quiet",
                "--no-progress",
                "-o",
                &template,
                "--print",
                "after_move:filepath",
                &url,
            ])
            .await
            .map_err(|reason| AcquisitionError::Download {
                url: url.clone(),
                reason,
            })?;

        match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(path) => Ok(PathBuf::from(path.trim())),
            None => {
                warn!("yt-dlp no imprimió la ruta final de {}", url);
                Err(AcquisitionError::Download {
                    url,
                    reason: "yt-dlp no informó el archivo descargado".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::MediaSource;

    #[test]
    fn parses_dump_json() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212.0,
            "url": "https://rr1.googlevideo.com/videoplayback?x=1",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "http_headers": {"User-Agent": "Mozilla/5.0"}
        }"#;

        let track = parse_info(json).unwrap();
        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.duration, Some(Duration::from_secs(212)));
        assert_eq!(track.stable_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(track.headers.get("User-Agent").map(String::as_str), Some("Mozilla/5.0"));
        assert_eq!(
            track.source,
            MediaSource::Remote {
                playable_url: "https://rr1.googlevideo.com/videoplayback?x=1".to_string(),
                original_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            }
        );
    }

    #[test]
    fn live_streams_have_no_duration() {
        let json = r#"{"id": "live", "title": "Radio", "duration": 5.0, "is_live": true, "url": "https://cdn/live.m3u8"}"#;
        let track = parse_info(json).unwrap();
        assert_eq!(track.duration, None);
        assert_eq!(track.original_location(), "https://cdn/live.m3u8");
    }

    #[test]
    fn missing_url_is_a_resolve_error() {
        let err = parse_info(r#"{"id": "x", "title": "sin formato"}"#).unwrap_err();
        assert!(matches!(err, AcquisitionError::Resolve(_)));

        let err = parse_info("no es json").unwrap_err();
        assert!(matches!(err, AcquisitionError::Resolve(_)));
    }
}
