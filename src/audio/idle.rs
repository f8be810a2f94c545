use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use super::{
    engine::{SessionCommand, SessionHandle},
    session::PlaybackStatus,
};

/// Quién sigue escuchando en el canal de voz del bot.
#[async_trait]
pub trait VoicePresence: Send + Sync {
    /// Miembros que no son bots en el canal del bot; `None` si el bot no está en ninguno.
    async fn listeners(&self, guild_id: GuildId) -> Option<usize>;

    async fn disconnect(&self, guild_id: GuildId) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Disconnected,
    Busy,
    ListenersPresent(usize),
    NotInChannel,
    Failed,
}

/// Espera `grace` y desconecta si la sesión sigue parada y nadie escucha.
pub async fn run_idle_check(session: SessionHandle, presence: Arc<dyn VoicePresence>, grace: Duration) -> IdleVerdict {
    tokio::time::sleep(grace).await;
    let guild_id = session.guild_id();

    match session.snapshot().await {
        Ok(snapshot) if snapshot.status == PlaybackStatus::Idle => {}
        Ok(_) => return IdleVerdict::Busy,
        Err(_) => return IdleVerdict::Failed,
    }

    match presence.listeners(guild_id).await {
        None => IdleVerdict::NotInChannel,
        Some(count) if count > 0 => IdleVerdict::ListenersPresent(count),
        Some(_) => match presence.disconnect(guild_id).await {
            Ok(()) => {
                info!("🚪 Desconectado por inactividad en guild {}", guild_id);
                session.notify(SessionCommand::Disconnected { reply: None });
                IdleVerdict::Disconnected
            }
            Err(e) => {
                warn!("⚠️ No se pudo desconectar por inactividad en guild {}: {:?}", guild_id, e);
                IdleVerdict::Failed
            }
        },
    }
}
