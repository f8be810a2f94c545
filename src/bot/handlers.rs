use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{application::CommandInteraction, id::GuildId},
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{voice, GuildPlayerBot};
use crate::{
    audio::{
        engine::{PlayOutcome, PreviousOutcome, SeekOutcome, SkipOutcome},
        error::PlaybackError,
        position::{format_duration, format_time},
        track::TrackRef,
    },
    ui::embeds::{self, MessageSurface},
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &GuildPlayerBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" | "playnow" | "addqueue" => handle_play(ctx, &command, bot, guild_id).await?,
        "pause" => {
            let embed = if bot.engine.pause(guild_id).await? {
                embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada")
            } else {
                embeds::create_warning_embed("Nada que pausar", "No hay ninguna canción sonando")
            };
            respond(ctx, &command, embed).await?;
        }
        "resume" => {
            let embed = if bot.engine.resume(guild_id).await? {
                embeds::create_success_embed("Reanudado", "▶️ Reproducción reanudada")
            } else {
                embeds::create_warning_embed("Nada que reanudar", "La reproducción no está pausada")
            };
            respond(ctx, &command, embed).await?;
        }
        "skip" => {
            let embed = match bot.engine.skip(guild_id).await? {
                SkipOutcome::NothingPlaying => {
                    embeds::create_warning_embed("Nada que saltar", "No hay ninguna canción sonando")
                }
                SkipOutcome::Skipped { next: Some(track) } => {
                    embeds::create_success_embed("Saltado", &format!("⏭️ Ahora suena **{}**", track.title))
                }
                SkipOutcome::Skipped { next: None } => {
                    embeds::create_success_embed("Saltado", "⏭️ La cola terminó")
                }
            };
            respond(ctx, &command, embed).await?;
        }
        "stop" => {
            bot.engine.stop(guild_id).await?;
            respond(
                ctx,
                &command,
                embeds::create_success_embed("Detenido", "⏹️ Reproducción detenida y cola vaciada"),
            )
            .await?;
        }
        "previous" => {
            let embed = match bot.engine.previous(guild_id).await {
                Ok(PreviousOutcome::Restarted) => embeds::create_success_embed("Reiniciado", "⏮️ Canción reiniciada"),
                Ok(PreviousOutcome::Playing(track)) => {
                    embeds::create_success_embed("Anterior", &format!("⏮️ Volviendo a **{}**", track.title))
                }
                Ok(PreviousOutcome::Nothing) => {
                    embeds::create_warning_embed("Sin historial", "No hay canciones anteriores")
                }
                Err(e) => playback_error_embed(&e),
            };
            respond(ctx, &command, embed).await?;
        }
        "seek" => handle_seek(ctx, &command, bot, guild_id).await?,
        "volume" => {
            let level = integer_option(&command, "level").unwrap_or(100);
            let applied = bot.engine.set_volume(guild_id, level.clamp(-1, 1000) as i32).await?;
            respond(
                ctx,
                &command,
                embeds::create_success_embed("Volumen", &format!("🔊 Volumen ajustado a {}%", applied)),
            )
            .await?;
        }
        "loop" => {
            let enabled = bot.engine.toggle_loop(guild_id).await?;
            let text = if enabled { "🔁 Loop activado" } else { "➡️ Loop desactivado" };
            respond(ctx, &command, embeds::create_success_embed("Loop", text)).await?;
        }
        "queue" => {
            let snapshot = bot.engine.snapshot(guild_id).await?;
            let queue = bot.engine.queue_snapshot(guild_id).await?;
            respond(ctx, &command, embeds::create_queue_embed(snapshot.current.as_ref(), &queue)).await?;
        }
        "removequeue" => {
            let index = integer_option(&command, "index").unwrap_or(0);
            let removed = match usize::try_from(index - 1) {
                Ok(index) => bot.engine.remove_from_queue(guild_id, index).await?,
                Err(_) => None,
            };
            let embed = match removed {
                Some(track) => embeds::create_success_embed("Quitado", &format!("➖ **{}** salió de la cola", track.title)),
                None => embeds::create_error_embed("Posición inválida", &format!("No hay canción #{} en la cola", index)),
            };
            respond(ctx, &command, embed).await?;
        }
        "clearqueue" => {
            let cleared = bot.engine.clear_queue(guild_id).await?;
            respond(
                ctx,
                &command,
                embeds::create_success_embed("Cola vaciada", &format!("🗑️ {} canción(es) quitadas", cleared)),
            )
            .await?;
        }
        "nowplaying" => {
            let snapshot = bot.engine.snapshot(guild_id).await?;
            respond(ctx, &command, embeds::create_now_playing_embed(&snapshot)).await?;
        }
        "leave" => {
            voice::leave(ctx, bot, guild_id).await?;
            respond(ctx, &command, embeds::create_success_embed("Desconectado", "👋 Hasta luego")).await?;
        }
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, guild_id: GuildId) -> Result<()> {
    let query = string_option(command, "query").ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    // Defer la respuesta ya que resolver y descargar puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let session_connected = bot.engine.snapshot(guild_id).await.map(|s| s.connected).unwrap_or(false);
    if !session_connected || !voice::is_connected(ctx, guild_id).await {
        let channel_id = match voice::user_voice_channel(ctx, guild_id, command.user.id) {
            Ok(channel_id) => channel_id,
            Err(e) => return edit(ctx, command, embeds::create_error_embed("Sin canal de voz", &e.to_string())).await,
        };
        voice::join(ctx, bot, guild_id, channel_id).await?;
    }

    let track = match bot.resolver.resolve(&query).await {
        Ok(track) => track,
        Err(e) => {
            warn!("No se pudo resolver {}: {}", query, e);
            return edit(ctx, command, embeds::create_error_embed("No encontrado", &e.to_string())).await;
        }
    };

    let result = match command.data.name.as_str() {
        "playnow" => bot.engine.play(guild_id, track.clone()).await.map(|_| PlayOutcome::Started),
        "addqueue" => bot.engine.enqueue(guild_id, track.clone()).await.map(PlayOutcome::Queued),
        _ => bot.engine.play_or_enqueue(guild_id, track.clone()).await,
    };

    match result {
        Ok(PlayOutcome::Started) => {
            edit(ctx, command, started_embed(&track)).await?;
            let message = command.get_response(&ctx.http).await?;
            let surface = MessageSurface::new(ctx.http.clone(), message.channel_id, message.id);
            bot.engine.attach_display(guild_id, Arc::new(surface));
        }
        Ok(PlayOutcome::Queued(position)) => {
            edit(ctx, command, embeds::create_track_added_embed(&track, position)).await?;
        }
        Err(e) => {
            error!("❌ Error al reproducir {}: {}", track.title, e);
            edit(ctx, command, playback_error_embed(&e)).await?;
        }
    }

    Ok(())
}

async fn handle_seek(ctx: &Context, command: &CommandInteraction, bot: &GuildPlayerBot, guild_id: GuildId) -> Result<()> {
    let raw = string_option(command, "position").unwrap_or_default();
    let Some(target) = parse_seek(&raw) else {
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Posición inválida", "Usa 1:30, 90, +10 o -15"),
        )
        .await;
    };

    let outcome = match target {
        SeekTarget::Absolute(secs) => bot.engine.seek(guild_id, secs).await,
        SeekTarget::Relative(delta) => bot.engine.seek_relative(guild_id, delta).await,
    };

    let embed = match outcome {
        Ok(SeekOutcome::Seeked(secs)) => embeds::create_success_embed("Seek", &format!("⏩ Saltando a {}", format_time(secs))),
        Ok(SeekOutcome::NothingPlaying) => embeds::create_warning_embed("Nada sonando", "No hay ninguna canción sonando"),
        Ok(SeekOutcome::BeyondDuration { duration }) => embeds::create_error_embed(
            "Fuera de rango",
            &format!("La canción dura {}", format_duration(Some(duration))),
        ),
        Err(e) => playback_error_embed(&e),
    };
    respond(ctx, command, embed).await
}

fn started_embed(track: &TrackRef) -> CreateEmbed {
    embeds::create_success_embed(
        "Reproduciendo",
        &format!("🎵 **{}** `[{}]`", track.title, format_duration(track.duration)),
    )
}

fn playback_error_embed(error: &PlaybackError) -> CreateEmbed {
    let title = match error {
        PlaybackError::NotConnected => "Sin conexión de voz",
        PlaybackError::QueueFull { .. } => "Cola llena",
        PlaybackError::Acquisition(_) | PlaybackError::Unplayable { .. } => "No se pudo reproducir",
        PlaybackError::Backend(_) => "Error de audio",
        PlaybackError::SessionClosed => "Sesión cerrada",
    };
    embeds::create_error_embed(title, &error.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekTarget {
    Absolute(u64),
    Relative(i64),
}

/// `"+10"`/`"-15"` son relativos; `"90"`, `"1:30"` y `"1:02:03"` absolutos.
fn parse_seek(input: &str) -> Option<SeekTarget> {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix('+') {
        return rest.parse::<i64>().ok().map(SeekTarget::Relative);
    }
    if input.starts_with('-') {
        return input.parse::<i64>().ok().map(SeekTarget::Relative);
    }

    let mut total: u64 = 0;
    let parts: Vec<&str> = input.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in parts {
        let value: u64 = part.parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(SeekTarget::Absolute(total))
}

fn string_option(command: &CommandInteraction, name: &str) -> Option<String> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
        .map(str::to_string)
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

async fn respond(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seek_positions() {
        assert_eq!(parse_seek("90"), Some(SeekTarget::Absolute(90)));
        assert_eq!(parse_seek("1:30"), Some(SeekTarget::Absolute(90)));
        assert_eq!(parse_seek("1:02:03"), Some(SeekTarget::Absolute(3723)));
        assert_eq!(parse_seek("+10"), Some(SeekTarget::Relative(10)));
        assert_eq!(parse_seek("-15"), Some(SeekTarget::Relative(-15)));
        assert_eq!(parse_seek("abc"), None);
        assert_eq!(parse_seek("1:2:3:4"), None);
        assert_eq!(parse_seek(""), None);
    }
}
