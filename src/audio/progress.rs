//! Recurring "now playing" progress updates.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    engine::SessionHandle,
    error::DisplayError,
    position::render_progress_bar,
    session::PlaybackStatus,
};

/// Una actualización de la barra de progreso lista para pintar.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub title: String,
    pub position_secs: u64,
    pub duration: Option<Duration>,
    pub status: PlaybackStatus,
    /// Último render tras confirmar que la reproducción terminó.
    pub finished: bool,
}

impl ProgressUpdate {
    pub fn bar(&self) -> String {
        render_progress_bar(self.position_secs, self.duration)
    }
}

/// Superficie donde se muestra el progreso (un mensaje editable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DisplaySurface: Send + Sync {
    async fn render(&self, update: ProgressUpdate) -> Result<(), DisplayError>;
}

struct ReporterSlot {
    id: u64,
    cancel: CancellationToken,
}

/// Una tarea de progreso por guild; iniciar otra reemplaza a la anterior.
pub struct ProgressReporter {
    tasks: Arc<DashMap<GuildId, ReporterSlot>>,
    interval: Duration,
    next_id: AtomicU64,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            interval,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn start(&self, guild_id: GuildId, session: SessionHandle, surface: Arc<dyn DisplaySurface>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        if let Some(previous) = self.tasks.insert(
            guild_id,
            ReporterSlot {
                id,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let tasks = self.tasks.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            report(session, surface, interval, &cancel).await;
            // Solo se borra la entrada si sigue siendo la de esta tarea.
            tasks.remove_if(&guild_id, |_, slot| slot.id == id);
            debug!("Reporter {} de guild {} terminado", id, guild_id);
        });

        id
    }

    pub fn cancel(&self, guild_id: GuildId) {
        if let Some((_, slot)) = self.tasks.remove(&guild_id) {
            slot.cancel.cancel();
        }
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.tasks.contains_key(&guild_id)
    }

    pub fn active_id(&self, guild_id: GuildId) -> Option<u64> {
        self.tasks.get(&guild_id).map(|slot| slot.id)
    }
}

async fn report(session: SessionHandle, surface: Arc<dyn DisplaySurface>, interval: Duration, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<ProgressUpdate> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Ok(snapshot) = session.snapshot().await else {
            break;
        };

        let (update, done) = match snapshot.current {
            Some(track) => (
                ProgressUpdate {
                    title: track.title,
                    position_secs: snapshot.position_secs,
                    duration: track.duration,
                    status: snapshot.status,
                    finished: false,
                },
                false,
            ),
            None => match last.take() {
                Some(mut update) => {
                    update.position_secs = update
                        .duration
                        .map(|d| d.as_secs())
                        .unwrap_or(update.position_secs);
                    update.status = PlaybackStatus::Idle;
                    update.finished = true;
                    (update, true)
                }
                None => break,
            },
        };

        // Cancelada mientras se leía el estado: no se pinta nada.
        if cancel.is_cancelled() {
            break;
        }

        match surface.render(update.clone()).await {
            Ok(()) => {}
            Err(DisplayError::Gone) => {
                debug!("Mensaje de progreso eliminado, reporter detenido");
                break;
            }
            Err(e) => warn!("⚠️ No se pudo actualizar el progreso: {}", e),
        }

        if done {
            break;
        }
        last = Some(update);
    }
}
