//! Download-first track acquisition and the shared artifact directory.
//!
//! Every network track is materialized to disk before playback; streaming the remote URL
//! is only the engine's last resort. Artifacts live in one directory shared by every guild,
//! so each download holds an [`ArtifactLease`] on its filename stem and cleanup sweeps skip
//! leased files.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serenity::model::id::GuildId;
use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};
use tokio::{fs, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    error::{AcquisitionError, CleanupError},
    track::{MediaSource, PlayableHandle, TrackRef},
};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("regex válida"));

const MAX_ID_LEN: usize = 64;

/// Descarga un track a `dir/<stem>.<ext>` y devuelve la ruta final.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, track: &TrackRef, dir: &Path, stem: &str) -> Result<PathBuf, AcquisitionError>;
}

/// Borra un artefacto del disco. Separado para poder simular archivos bloqueados.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Borrado real con `tokio::fs`.
pub struct FsRemover;

#[async_trait]
impl ArtifactRemover for FsRemover {
    async fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::metadata(path).await?.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        }
    }
}

/// Intentos y espera entre intentos de la limpieza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            retries: 15,
            delay: Duration::from_millis(1500),
        }
    }
}

/// Directorio de descargas compartido y los stems reservados por sesiones activas.
pub struct ArtifactStore {
    dir: PathBuf,
    leases: DashMap<String, GuildId>,
    remover: Arc<dyn ArtifactRemover>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_remover(dir, Arc::new(FsRemover))
    }

    pub fn with_remover(dir: impl Into<PathBuf>, remover: Arc<dyn ArtifactRemover>) -> Self {
        Self {
            dir: dir.into(),
            leases: DashMap::new(),
            remover,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Vacía y recrea el directorio al arrancar: nada de una ejecución anterior está en uso.
    pub async fn prepare(&self) -> io::Result<()> {
        if fs::try_exists(&self.dir).await? {
            info!("🧹 Limpiando descargas previas en {}", self.dir.display());
            fs::remove_dir_all(&self.dir).await?;
        }
        fs::create_dir_all(&self.dir).await
    }

    /// Reserva un stem único `{id}_{guild}_{millis}` para una descarga.
    pub fn lease(self: &Arc<Self>, guild_id: GuildId, track: &TrackRef) -> ArtifactLease {
        let artifact_id = track.artifact_id();
        let id = UNSAFE_FILENAME_CHARS.replace_all(&artifact_id, "_");
        let id: String = id.chars().take(MAX_ID_LEN).collect();
        let stem = format!("{}_{}_{}", id, guild_id, chrono::Utc::now().timestamp_millis());

        self.leases.insert(stem.clone(), guild_id);
        debug!("📌 Artefacto reservado: {}", stem);

        ArtifactLease {
            store: Arc::clone(self),
            stem,
        }
    }

    pub fn is_leased(&self, file_name: &str) -> bool {
        self.leases
            .iter()
            .any(|lease| file_name.starts_with(lease.key().as_str()))
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Borra todo lo que no esté reservado, reintentando los archivos que sigan bloqueados
    /// (el transcoder puede tardar en soltarlos). Devuelve cuántas entradas se borraron.
    pub async fn sweep(&self, policy: CleanupPolicy) -> Result<usize, CleanupError> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut removed = 0;
        for attempt in 1..=policy.retries {
            let pending = self.unleased_entries().await;
            if pending.is_empty() {
                return Ok(removed);
            }

            for path in pending {
                match self.remover.remove(&path).await {
                    Ok(()) => {
                        removed += 1;
                        debug!("🗑️ Artefacto eliminado: {}", path.display());
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => debug!(
                        "🔒 {} sigue en uso (intento {}/{}): {}",
                        path.display(),
                        attempt,
                        policy.retries,
                        e
                    ),
                }
            }

            if self.unleased_entries().await.is_empty() {
                return Ok(removed);
            }
            if attempt < policy.retries {
                tokio::time::sleep(policy.delay).await;
            }
        }

        let leftover = self.unleased_entries().await;
        if leftover.is_empty() {
            Ok(removed)
        } else {
            Err(CleanupError {
                dir: self.dir.clone(),
                attempts: policy.retries,
                leftover,
            })
        }
    }

    /// Lanza una limpieza en segundo plano; los fallos solo se registran.
    pub fn schedule_sweep(self: &Arc<Self>, policy: CleanupPolicy) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            match store.sweep(policy).await {
                Ok(0) => {}
                Ok(removed) => info!("🧹 Limpieza completada: {} artefacto(s) eliminados", removed),
                Err(e) => warn!("⚠️ Limpieza incompleta: {}", e),
            }
        })
    }

    async fn unleased_entries(&self) -> Vec<PathBuf> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No se pudo listar {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut paths = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !self.is_leased(&name.to_string_lossy()) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        paths
    }
}

/// Reserva sobre un stem del directorio de descargas; se libera al soltarla.
pub struct ArtifactLease {
    store: Arc<ArtifactStore>,
    stem: String,
}

impl ArtifactLease {
    pub fn stem(&self) -> &str {
        &self.stem
    }
}

impl std::fmt::Debug for ArtifactLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ArtifactLease").field(&self.stem).finish()
    }
}

impl Drop for ArtifactLease {
    fn drop(&mut self) {
        self.store.leases.remove(&self.stem);
    }
}

/// Track listo para el backend, con la reserva de su artefacto si se descargó.
#[derive(Debug)]
pub struct AcquiredTrack {
    pub handle: PlayableHandle,
    pub lease: Option<ArtifactLease>,
}

/// Obtiene un recurso local reproducible para cada track.
pub struct TrackAcquirer {
    downloader: Arc<dyn MediaDownloader>,
    store: Arc<ArtifactStore>,
}

impl TrackAcquirer {
    pub fn new(downloader: Arc<dyn MediaDownloader>, store: Arc<ArtifactStore>) -> Self {
        Self { downloader, store }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub async fn acquire(&self, guild_id: GuildId, track: &TrackRef) -> Result<AcquiredTrack, AcquisitionError> {
        match &track.source {
            MediaSource::Local(path) => {
                if !fs::try_exists(path).await? {
                    return Err(AcquisitionError::MissingArtifact(path.clone()));
                }
                Ok(AcquiredTrack {
                    handle: PlayableHandle::LocalFile(path.clone()),
                    lease: None,
                })
            }
            MediaSource::Remote { original_url, .. } => {
                fs::create_dir_all(self.store.dir()).await?;

                let lease = self.store.lease(guild_id, track);
                info!("⬇️ Descargando {} ({})", track.title, original_url);

                let path = self
                    .downloader
                    .download(track, self.store.dir(), lease.stem())
                    .await?;

                if !fs::try_exists(&path).await? {
                    return Err(AcquisitionError::MissingArtifact(path));
                }

                debug!("✅ Descarga lista: {}", path.display());
                Ok(AcquiredTrack {
                    handle: PlayableHandle::LocalFile(path),
                    lease: Some(lease),
                })
            }
        }
    }
}
