//! Voice channel join/leave and the presence checks used by the idle disconnect.

use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    all::{ChannelId, Context, GuildId, UserId},
    cache::Cache,
};
use songbird::Songbird;
use std::sync::Arc;
use tracing::info;

use super::GuildPlayerBot;
use crate::audio::{backend::SongbirdBackend, idle::VoicePresence};

/// Conecta el bot al canal y registra el backend de voz en la sesión de la guild.
pub async fn join(ctx: &Context, bot: &GuildPlayerBot, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    let call = manager
        .join(guild_id, channel_id)
        .await
        .map_err(|e| anyhow::anyhow!("Error al conectar al canal de voz: {:?}", e))?;

    let backend = Arc::new(SongbirdBackend::new(call, bot.http_client.clone()));
    let presence = Arc::new(SerenityPresence::new(ctx.cache.clone(), manager));
    bot.engine.connect(guild_id, backend, presence).await?;

    info!("🔊 Conectado al canal de voz en guild {}", guild_id);
    Ok(())
}

pub async fn leave(ctx: &Context, bot: &GuildPlayerBot, guild_id: GuildId) -> Result<()> {
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    bot.engine.disconnected(guild_id).await?;
    manager.remove(guild_id).await?;

    info!("👋 Desconectado del canal de voz en guild {}", guild_id);
    Ok(())
}

/// `true` si ya existe una llamada de songbird para la guild.
pub async fn is_connected(ctx: &Context, guild_id: GuildId) -> bool {
    match songbird::get(ctx).await {
        Some(manager) => manager.get(guild_id).is_some(),
        None => false,
    }
}

pub fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))
}

/// Cuenta oyentes a partir de la caché de serenity y la llamada de songbird.
pub struct SerenityPresence {
    cache: Arc<Cache>,
    songbird: Arc<Songbird>,
}

impl SerenityPresence {
    pub fn new(cache: Arc<Cache>, songbird: Arc<Songbird>) -> Self {
        Self { cache, songbird }
    }
}

#[async_trait]
impl VoicePresence for SerenityPresence {
    async fn listeners(&self, guild_id: GuildId) -> Option<usize> {
        let call = self.songbird.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        let channel_id = ChannelId::from(channel.0);

        // La referencia de la caché no se mantiene a través de ningún await.
        let guild = self.cache.guild(guild_id)?;
        let count = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| {
                let is_bot = guild
                    .members
                    .get(&state.user_id)
                    .map(|member| member.user.bot)
                    .or_else(|| state.member.as_ref().map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .count();
        Some(count)
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<()> {
        self.songbird.remove(guild_id).await?;
        Ok(())
    }
}
