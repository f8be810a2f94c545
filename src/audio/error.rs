//! Error types for the playback core.
//!
//! Only [`AcquisitionError`] (when the streaming fallback also fails) and
//! [`BackendError`] ever reach the command layer, wrapped in [`PlaybackError`].
//! Cleanup and display failures are logged where they happen.

use std::path::PathBuf;
use thiserror::Error;

/// The source could not be turned into a local playable resource.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("no se pudo resolver la fuente: {0}")]
    Resolve(String),

    #[error("falló la descarga de {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("el archivo descargado no existe: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("error de E/S al preparar el artefacto: {0}")]
    Io(#[from] std::io::Error),
}

/// The voice transport refused an operation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("el backend no pudo iniciar la fuente: {0}")]
    Start(String),

    #[error("el backend no pudo hacer seek: {0}")]
    Seek(String),

    #[error("control de pista rechazado: {0}")]
    Control(String),
}

/// Errors surfaced to the command layer.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no hay conexión de voz para este servidor")]
    NotConnected,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("descarga fallida ({acquisition}) y streaming directo fallido ({fallback})")]
    Unplayable {
        acquisition: AcquisitionError,
        fallback: BackendError,
    },

    #[error("la sesión de reproducción ya no está disponible")]
    SessionClosed,
}

/// A downloaded artifact stayed locked past the retry budget. Never fatal.
#[derive(Debug, Error)]
#[error("{} archivo(s) siguen bloqueados en {} tras {attempts} intentos", .leftover.len(), .dir.display())]
pub struct CleanupError {
    pub dir: PathBuf,
    pub attempts: u32,
    pub leftover: Vec<PathBuf>,
}

/// Failure editing the display surface.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// The message was deleted or expired; the reporter stops ticking.
    #[error("el mensaje ya no existe")]
    Gone,

    #[error("error transitorio al actualizar el mensaje: {0}")]
    Transient(String),
}
