pub mod ytdlp;

use async_trait::async_trait;

use crate::audio::{error::AcquisitionError, track::TrackRef};

pub use ytdlp::YtDlpClient;

/// Convierte lo que escribe el usuario (enlace o búsqueda) en un track reproducible.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<TrackRef, AcquisitionError>;
}

/// `true` si `input` es una URL http(s); cualquier otra cosa se trata como búsqueda.
pub fn is_url(input: &str) -> bool {
    url::Url::parse(input.trim())
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("http://example.com/a.mp3"));
        assert!(!is_url("rick astley never gonna"));
        assert!(!is_url("ftp://example.com/a.mp3"));
    }
}
