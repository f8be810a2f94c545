use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    path::PathBuf,
    time::Duration,
};

/// Dónde vive el medio de un track antes de adquirirlo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Fuente de red: URL reproducible (puede expirar) y URL original de la página.
    Remote {
        playable_url: String,
        original_url: String,
    },
    /// Archivo ya presente en disco.
    Local(PathBuf),
}

/// Referencia a una unidad reproducible tal como la entrega el resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub title: String,
    pub source: MediaSource,
    pub duration: Option<Duration>,
    pub headers: HashMap<String, String>,
    pub stable_id: Option<String>,
}

impl TrackRef {
    pub fn remote(title: impl Into<String>, playable_url: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: MediaSource::Remote {
                playable_url: playable_url.into(),
                original_url: original_url.into(),
            },
            duration: None,
            headers: HashMap::new(),
            stable_id: None,
        }
    }

    pub fn local(title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            source: MediaSource::Local(path.into()),
            duration: None,
            headers: HashMap::new(),
            stable_id: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_stable_id(mut self, id: impl Into<String>) -> Self {
        self.stable_id = Some(id.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// URL de la página original (o la ruta local) usada para descargar y deduplicar.
    pub fn original_location(&self) -> String {
        match &self.source {
            MediaSource::Remote { original_url, .. } => original_url.clone(),
            MediaSource::Local(path) => path.display().to_string(),
        }
    }

    /// Identidad del track: id estable si existe, si no la ubicación original.
    pub fn identity(&self) -> String {
        self.stable_id
            .clone()
            .unwrap_or_else(|| self.original_location())
    }

    pub fn is_same_track(&self, other: &TrackRef) -> bool {
        self.identity() == other.identity()
    }

    /// Id usado para nombrar artefactos; sin id estable se usa un hash de la URL original.
    pub fn artifact_id(&self) -> String {
        match &self.stable_id {
            Some(id) => id.clone(),
            None => {
                let mut hasher = DefaultHasher::new();
                self.original_location().hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        }
    }
}

/// Recurso que el backend de voz puede reproducir directamente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableHandle {
    LocalFile(PathBuf),
    Stream {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl PlayableHandle {
    /// Streaming directo de la URL reproducible: último recurso si la descarga falla.
    pub fn direct_stream(track: &TrackRef) -> Option<Self> {
        match &track.source {
            MediaSource::Remote { playable_url, .. } => Some(Self::Stream {
                url: playable_url.clone(),
                headers: track.headers.clone(),
            }),
            MediaSource::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalFile(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_stable_id() {
        let a = TrackRef::remote("A", "https://cdn/a", "https://site/a").with_stable_id("abc");
        let b = TrackRef::remote("A (otra url)", "https://cdn/a2", "https://site/other").with_stable_id("abc");
        assert!(a.is_same_track(&b));

        let c = TrackRef::remote("C", "https://cdn/c", "https://site/c");
        assert_eq!(c.identity(), "https://site/c");
        assert!(!a.is_same_track(&c));
    }

    #[test]
    fn artifact_id_is_stable_without_id() {
        let a = TrackRef::remote("A", "https://cdn/a", "https://site/a");
        assert_eq!(a.artifact_id(), a.clone().artifact_id());
        assert_eq!(a.artifact_id().len(), 16);
    }

    #[test]
    fn local_tracks_have_no_stream_fallback() {
        let track = TrackRef::local("local", "/tmp/song.mp3");
        assert_eq!(PlayableHandle::direct_stream(&track), None);

        let remote = TrackRef::remote("r", "https://cdn/r", "https://site/r");
        assert!(matches!(
            PlayableHandle::direct_stream(&remote),
            Some(PlayableHandle::Stream { ref url, .. }) if url == "https://cdn/r"
        ));
    }
}
