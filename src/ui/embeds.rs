use async_trait::async_trait;
use serenity::{
    all::{ChannelId, MessageId, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter, EditMessage},
    http::{Http, HttpError},
};
use std::sync::Arc;

use crate::audio::{
    engine::SessionSnapshot,
    error::DisplayError,
    position::{format_duration, render_progress_bar},
    progress::{DisplaySurface, ProgressUpdate},
    session::PlaybackStatus,
    track::TrackRef,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Player";

/// Canciones de la cola mostradas en `/queue`.
const QUEUE_PAGE_SIZE: usize = 10;

fn status_label(status: PlaybackStatus, finished: bool) -> &'static str {
    match (status, finished) {
        (_, true) => "✅ Terminado",
        (PlaybackStatus::Playing, _) => "▶️ Reproduciendo",
        (PlaybackStatus::Paused, _) => "⏸️ Pausado",
        (PlaybackStatus::Idle, _) => "⏹️ Detenido",
    }
}

/// Embed del mensaje de progreso, re-pintado en cada tick.
pub fn create_progress_embed(update: &ProgressUpdate) -> CreateEmbed {
    let color = if update.finished {
        colors::NEUTRAL_GRAY
    } else {
        colors::MUSIC_PURPLE
    };

    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**\n{}", update.title, update.bar()))
        .color(color)
        .field("Estado", status_label(update.status, update.finished), true)
        .field("⏱️ Duración", format_duration(update.duration), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para `/nowplaying`
pub fn create_now_playing_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let Some(track) = &snapshot.current else {
        return create_info_embed("Nada sonando", "No hay ninguna canción en reproducción");
    };

    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!(
            "**{}**\n{}",
            track.title,
            render_progress_bar(snapshot.position_secs, track.duration)
        ))
        .color(colors::MUSIC_PURPLE)
        .field("Estado", status_label(snapshot.status, false), true)
        .field("🔊 Volumen", format!("{}%", (snapshot.volume * 100.0).round() as u16), true)
        .field("🔁 Loop", if snapshot.loop_enabled { "Activado" } else { "Desactivado" }, true)
        .field("📋 En cola", snapshot.queue_len.to_string(), true)
        .url(track.original_location())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &TrackRef, position: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** se ha agregado a la cola de reproducción", track.title))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", format_duration(track.duration), true)
        .field("📍 Posición", format!("#{}", position), true)
        .url(track.original_location())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new("🎵 Se reproducirá automáticamente cuando llegue su turno"))
}

/// Crea un embed con la cola actual
pub fn create_queue_embed(current: Option<&TrackRef>, queue: &[TrackRef]) -> CreateEmbed {
    let mut description = match current {
        Some(track) => format!("**Sonando:** {}\n\n", track.title),
        None => String::new(),
    };

    if queue.is_empty() {
        description.push_str("📭 La cola está vacía");
    } else {
        for (index, track) in queue.iter().take(QUEUE_PAGE_SIZE).enumerate() {
            description.push_str(&format!(
                "`{}.` {} `[{}]`\n",
                index + 1,
                track.title,
                format_duration(track.duration)
            ));
        }
        if queue.len() > QUEUE_PAGE_SIZE {
            description.push_str(&format!("\n… y {} más", queue.len() - QUEUE_PAGE_SIZE));
        }
    }

    CreateEmbed::default()
        .title(format!("📋 Cola de Reproducción ({})", queue.len()))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Mensaje de Discord editado en cada tick del reporter.
pub struct MessageSurface {
    http: Arc<Http>,
    channel_id: ChannelId,
    message_id: MessageId,
}

impl MessageSurface {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            http,
            channel_id,
            message_id,
        }
    }
}

#[async_trait]
impl DisplaySurface for MessageSurface {
    async fn render(&self, update: ProgressUpdate) -> Result<(), DisplayError> {
        let edit = EditMessage::new().embed(create_progress_embed(&update));

        match self
            .channel_id
            .edit_message(&*self.http, self.message_id, edit)
            .await
        {
            Ok(_) => Ok(()),
            Err(serenity::Error::Http(HttpError::UnsuccessfulRequest(response)))
                if response.status_code.as_u16() == 404 =>
            {
                Err(DisplayError::Gone)
            }
            Err(e) => Err(DisplayError::Transient(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_labels() {
        assert_eq!(status_label(PlaybackStatus::Playing, false), "▶️ Reproduciendo");
        assert_eq!(status_label(PlaybackStatus::Paused, false), "⏸️ Pausado");
        assert_eq!(status_label(PlaybackStatus::Playing, true), "✅ Terminado");
    }

    #[test]
    fn progress_embed_contains_the_bar() {
        let update = ProgressUpdate {
            title: "Canción".to_string(),
            position_secs: 65,
            duration: Some(Duration::from_secs(130)),
            status: PlaybackStatus::Playing,
            finished: false,
        };
        let json = serde_json::to_string(&create_progress_embed(&update)).unwrap();
        assert!(json.contains("01:05"));
        assert!(json.contains("02:10"));
    }
}
