//! # Bot Module
//!
//! Serenity command layer for Guild Player.
//!
//! - Command registration and handling
//! - Voice connection management ([`voice`])
//! - Event handling (ready, interactions, voice state updates)
//!
//! All playback goes through the shared [`PlaybackEngine`]; this module only parses
//! interactions, resolves queries and renders the results.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod voice;

use crate::{audio::engine::PlaybackEngine, config::Config, sources::SourceResolver};

/// Main Discord event handler.
pub struct GuildPlayerBot {
    config: Arc<Config>,
    /// Sesiones de reproducción por guild
    pub engine: PlaybackEngine,
    /// Resolver de enlaces y búsquedas
    pub resolver: Arc<dyn SourceResolver>,
    /// Cliente HTTP compartido con songbird para el streaming directo
    pub http_client: reqwest::Client,
}

impl GuildPlayerBot {
    pub fn new(
        config: Arc<Config>,
        engine: PlaybackEngine,
        resolver: Arc<dyn SourceResolver>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            engine,
            resolver,
            http_client,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Guild commands (when `GUILD_ID` is set) propagate in about a second, global ones
    /// can take up to an hour.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild."
                    )
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!(
                        "No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'."
                    )
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildPlayerBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Limpia la sesión cuando el bot sale del canal o lo expulsan.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            if let Err(e) = self.engine.disconnected(guild_id).await {
                error!("Error al limpiar la sesión: {:?}", e);
            }
        }
    }
}
