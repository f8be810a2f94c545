//! Per-guild playback engine.
//!
//! Every guild gets a [`SessionActor`]: a tokio task that owns the guild's
//! [`SessionState`] and processes [`SessionCommand`]s one at a time from a `flume`
//! mailbox. Commands from the bot, the end-of-source signal from songbird, progress ticks
//! and idle checks all arrive as messages, so nothing mutates session state concurrently
//! and operations on one guild are applied in the order they were sent.

use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, info, warn};

use super::{
    acquirer::{AcquiredTrack, ArtifactLease, CleanupPolicy, TrackAcquirer},
    backend::{EndSignal, SourceToken, VoiceBackend},
    error::PlaybackError,
    idle::{run_idle_check, VoicePresence},
    position::estimate_position,
    progress::{DisplaySurface, ProgressReporter},
    session::{PlaybackStatus, SessionState, DEFAULT_HISTORY_LIMIT, DEFAULT_VOLUME, MAX_VOLUME},
    track::{PlayableHandle, TrackRef},
};
use crate::config::Config;

/// Ajustes del motor derivados de la configuración.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub history_limit: usize,
    pub progress_interval: Duration,
    pub idle_disconnect_after: Duration,
    pub cleanup: CleanupPolicy,
    pub previous_restart_threshold: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_volume: DEFAULT_VOLUME,
            max_queue_size: 1000,
            history_limit: DEFAULT_HISTORY_LIMIT,
            progress_interval: Duration::from_secs(10),
            idle_disconnect_after: Duration::from_secs(120),
            cleanup: CleanupPolicy::default(),
            previous_restart_threshold: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            history_limit: config.history_limit,
            progress_interval: config.progress_interval,
            idle_disconnect_after: config.idle_disconnect_after,
            cleanup: CleanupPolicy {
                retries: config.cleanup_retries,
                delay: config.cleanup_delay,
            },
            previous_restart_threshold: config.previous_restart_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// Posición en la cola, empezando en 1.
    Queued(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    Seeked(u64),
    NothingPlaying,
    BeyondDuration { duration: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviousOutcome {
    /// El track actual volvió a empezar desde 0.
    Restarted,
    /// Suena el último track del historial.
    Playing(TrackRef),
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    NothingPlaying,
    Skipped { next: Option<TrackRef> },
}

/// Vista de solo lectura de una sesión.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: PlaybackStatus,
    pub current: Option<TrackRef>,
    pub position_secs: u64,
    pub volume: f32,
    pub loop_enabled: bool,
    pub queue_len: usize,
    /// Hay un backend de voz registrado en la sesión.
    pub connected: bool,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current: None,
            position_secs: 0,
            volume: DEFAULT_VOLUME,
            loop_enabled: false,
            queue_len: 0,
            connected: false,
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

/// Mensajes del buzón de una sesión.
pub(crate) enum SessionCommand {
    Connect {
        backend: Arc<dyn VoiceBackend>,
        presence: Arc<dyn VoicePresence>,
        reply: Reply<()>,
    },
    AttachDisplay {
        surface: Arc<dyn DisplaySurface>,
    },
    Play {
        track: TrackRef,
        reply: Reply<Result<(), PlaybackError>>,
    },
    PlayOrEnqueue {
        track: TrackRef,
        reply: Reply<Result<PlayOutcome, PlaybackError>>,
    },
    Enqueue {
        track: TrackRef,
        reply: Reply<Result<usize, PlaybackError>>,
    },
    Skip {
        reply: Reply<SkipOutcome>,
    },
    Stop {
        reply: Reply<bool>,
    },
    Pause {
        reply: Reply<bool>,
    },
    Resume {
        reply: Reply<bool>,
    },
    Seek {
        target_secs: u64,
        reply: Reply<Result<SeekOutcome, PlaybackError>>,
    },
    SeekRelative {
        delta_secs: i64,
        reply: Reply<Result<SeekOutcome, PlaybackError>>,
    },
    SetVolume {
        volume: f32,
        reply: Reply<f32>,
    },
    ToggleLoop {
        reply: Reply<bool>,
    },
    Previous {
        reply: Reply<Result<PreviousOutcome, PlaybackError>>,
    },
    Queue {
        reply: Reply<Vec<TrackRef>>,
    },
    RemoveFromQueue {
        index: usize,
        reply: Reply<Option<TrackRef>>,
    },
    ClearQueue {
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Disconnected {
        reply: Option<Reply<()>>,
    },
    SourceEnded {
        token: SourceToken,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Dirección del buzón de una sesión.
#[derive(Clone)]
pub struct SessionHandle {
    guild_id: GuildId,
    tx: flume::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(guild_id: GuildId, tx: flume::Sender<SessionCommand>) -> Self {
        Self { guild_id, tx }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub(crate) async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send_async(build(reply))
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        rx.await.map_err(|_| PlaybackError::SessionClosed)
    }

    /// Envía sin esperar respuesta.
    pub(crate) fn notify(&self, command: SessionCommand) {
        if self.tx.send(command).is_err() {
            debug!("Buzón de guild {} cerrado", self.guild_id);
        }
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, PlaybackError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }
}

struct EngineShared {
    sessions: DashMap<GuildId, SessionHandle>,
    acquirer: Arc<TrackAcquirer>,
    reporter: Arc<ProgressReporter>,
    settings: EngineSettings,
}

/// Registro de sesiones por guild y punto de entrada de la capa de comandos.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
}

impl PlaybackEngine {
    pub fn new(acquirer: Arc<TrackAcquirer>, settings: EngineSettings) -> Self {
        let reporter = Arc::new(ProgressReporter::new(settings.progress_interval));
        Self {
            shared: Arc::new(EngineShared {
                sessions: DashMap::new(),
                acquirer,
                reporter,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.shared.reporter
    }

    /// Sesión de la guild, creada en el primer uso.
    ///
    /// Si el actor de la guild terminó sin un `Shutdown` (su buzón quedó sin receptor),
    /// se crea uno nuevo en su lugar; la sesión nueva empieza sin conexión de voz.
    pub fn session(&self, guild_id: GuildId) -> SessionHandle {
        let mut entry = self
            .shared
            .sessions
            .entry(guild_id)
            .or_insert_with(|| SessionActor::spawn(guild_id, &self.shared));
        if entry.tx.is_disconnected() {
            warn!("⚠️ La sesión de guild {} terminó inesperadamente, creando una nueva", guild_id);
            *entry = SessionActor::spawn(guild_id, &self.shared);
        }
        entry.clone()
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.shared.sessions.contains_key(&guild_id)
    }

    pub async fn connect(
        &self,
        guild_id: GuildId,
        backend: Arc<dyn VoiceBackend>,
        presence: Arc<dyn VoicePresence>,
    ) -> Result<(), PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Connect {
                backend,
                presence,
                reply,
            })
            .await
    }

    /// Mensaje donde se pinta el progreso de la sesión.
    pub fn attach_display(&self, guild_id: GuildId, surface: Arc<dyn DisplaySurface>) {
        self.session(guild_id)
            .notify(SessionCommand::AttachDisplay { surface });
    }

    pub async fn play(&self, guild_id: GuildId, track: TrackRef) -> Result<(), PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Play { track, reply })
            .await?
    }

    pub async fn play_or_enqueue(&self, guild_id: GuildId, track: TrackRef) -> Result<PlayOutcome, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::PlayOrEnqueue { track, reply })
            .await?
    }

    pub async fn enqueue(&self, guild_id: GuildId, track: TrackRef) -> Result<usize, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Enqueue { track, reply })
            .await?
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<SkipOutcome, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Skip { reply })
            .await
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Stop { reply })
            .await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Pause { reply })
            .await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Resume { reply })
            .await
    }

    pub async fn seek(&self, guild_id: GuildId, target_secs: u64) -> Result<SeekOutcome, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Seek { target_secs, reply })
            .await?
    }

    pub async fn seek_relative(&self, guild_id: GuildId, delta_secs: i64) -> Result<SeekOutcome, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::SeekRelative { delta_secs, reply })
            .await?
    }

    /// Ajusta el volumen en porcentaje (0-200) y devuelve el valor aplicado.
    pub async fn set_volume(&self, guild_id: GuildId, percent: i32) -> Result<u16, PlaybackError> {
        let max_percent = (MAX_VOLUME * 100.0) as i32;
        let volume = percent.clamp(0, max_percent) as f32 / 100.0;
        let applied = self
            .session(guild_id)
            .request(|reply| SessionCommand::SetVolume { volume, reply })
            .await?;
        Ok((applied * 100.0).round() as u16)
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::ToggleLoop { reply })
            .await
    }

    pub async fn previous(&self, guild_id: GuildId) -> Result<PreviousOutcome, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Previous { reply })
            .await?
    }

    pub async fn queue_snapshot(&self, guild_id: GuildId) -> Result<Vec<TrackRef>, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::Queue { reply })
            .await
    }

    /// Quita el elemento `index` (desde 0) de la cola.
    pub async fn remove_from_queue(&self, guild_id: GuildId, index: usize) -> Result<Option<TrackRef>, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::RemoveFromQueue { index, reply })
            .await
    }

    pub async fn clear_queue(&self, guild_id: GuildId) -> Result<usize, PlaybackError> {
        self.session(guild_id)
            .request(|reply| SessionCommand::ClearQueue { reply })
            .await
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> Result<SessionSnapshot, PlaybackError> {
        self.session(guild_id).snapshot().await
    }

    /// El bot salió del canal de voz (o lo expulsaron).
    pub async fn disconnected(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        let Some(session) = self.shared.sessions.get(&guild_id).map(|s| s.clone()) else {
            return Ok(());
        };
        session
            .request(|reply| SessionCommand::Disconnected { reply: Some(reply) })
            .await
    }

    /// Detiene todas las sesiones. Los actores terminan tras responder.
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionHandle> = self
            .shared
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.shared.sessions.clear();

        info!("🛑 Cerrando {} sesión(es) de reproducción", sessions.len());
        join_all(
            sessions
                .iter()
                .map(|session| session.request(|reply| SessionCommand::Shutdown { reply })),
        )
        .await;
    }
}

/// Fuente que el backend está reproduciendo ahora mismo.
struct ActiveSource {
    token: SourceToken,
    handle: PlayableHandle,
    lease: Option<ArtifactLease>,
}

struct SessionActor {
    guild_id: GuildId,
    state: SessionState,
    settings: EngineSettings,
    acquirer: Arc<TrackAcquirer>,
    reporter: Arc<ProgressReporter>,
    handle: SessionHandle,
    backend: Option<Arc<dyn VoiceBackend>>,
    presence: Option<Arc<dyn VoicePresence>>,
    display: Option<Arc<dyn DisplaySurface>>,
    active: Option<ActiveSource>,
    next_token: u64,
}

impl SessionActor {
    fn spawn(guild_id: GuildId, shared: &EngineShared) -> SessionHandle {
        let (tx, rx) = flume::unbounded();
        let handle = SessionHandle::new(guild_id, tx);

        let actor = SessionActor {
            guild_id,
            state: SessionState::new(shared.settings.default_volume, shared.settings.history_limit),
            settings: shared.settings.clone(),
            acquirer: shared.acquirer.clone(),
            reporter: shared.reporter.clone(),
            handle: handle.clone(),
            backend: None,
            presence: None,
            display: None,
            active: None,
            next_token: 0,
        };

        debug!("Sesión creada para guild {}", guild_id);
        tokio::spawn(actor.run(rx));
        handle
    }

    async fn run(mut self, rx: flume::Receiver<SessionCommand>) {
        while let Ok(command) = rx.recv_async().await {
            if let SessionCommand::Shutdown { reply } = command {
                self.teardown().await;
                let _ = reply.send(());
                break;
            }
            self.handle_command(command).await;
        }
        debug!("Sesión de guild {} terminada", self.guild_id);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect {
                backend,
                presence,
                reply,
            } => {
                self.backend = Some(backend);
                self.presence = Some(presence);
                info!("🔊 Backend de voz listo para guild {}", self.guild_id);
                let _ = reply.send(());
            }
            SessionCommand::AttachDisplay { surface } => {
                self.display = Some(surface);
                if self.state.current().is_some() {
                    self.start_reporter();
                }
            }
            SessionCommand::Play { track, reply } => {
                let _ = reply.send(self.start_track(track, 0, true).await);
            }
            SessionCommand::PlayOrEnqueue { track, reply } => {
                let outcome = if self.state.status() == PlaybackStatus::Idle {
                    self.start_track(track, 0, true).await.map(|_| PlayOutcome::Started)
                } else {
                    self.enqueue(track).map(PlayOutcome::Queued)
                };
                let _ = reply.send(outcome);
            }
            SessionCommand::Enqueue { track, reply } => {
                let _ = reply.send(self.enqueue(track));
            }
            SessionCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            SessionCommand::Seek { target_secs, reply } => {
                let _ = reply.send(self.seek(target_secs).await);
            }
            SessionCommand::SeekRelative { delta_secs, reply } => {
                let outcome = if self.state.current().is_none() {
                    Ok(SeekOutcome::NothingPlaying)
                } else {
                    let target = estimate_position(&self.state).saturating_add_signed(delta_secs);
                    self.seek(target).await
                };
                let _ = reply.send(outcome);
            }
            SessionCommand::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            SessionCommand::ToggleLoop { reply } => {
                let enabled = self.state.toggle_loop();
                info!("🔁 Loop {} en guild {}", if enabled { "activado" } else { "desactivado" }, self.guild_id);
                let _ = reply.send(enabled);
            }
            SessionCommand::Previous { reply } => {
                let _ = reply.send(self.previous().await);
            }
            SessionCommand::Queue { reply } => {
                let _ = reply.send(self.state.queue().iter().cloned().collect());
            }
            SessionCommand::RemoveFromQueue { index, reply } => {
                let removed = self.state.remove_at(index);
                if let Some(track) = &removed {
                    info!("➖ Quitado de la cola: {}", track.title);
                }
                let _ = reply.send(removed);
            }
            SessionCommand::ClearQueue { reply } => {
                let cleared = self.state.clear_queue();
                info!("🗑️ Cola vaciada en guild {} ({} canciones)", self.guild_id, cleared);
                let _ = reply.send(cleared);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Disconnected { reply } => {
                self.teardown().await;
                // Reintenta también lo que dejaron limpiezas anteriores.
                self.acquirer.store().schedule_sweep(self.settings.cleanup);
                self.backend = None;
                self.presence = None;
                self.display = None;
                info!("🔌 Sesión de guild {} desconectada", self.guild_id);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            SessionCommand::SourceEnded { token } => self.on_source_ended(token).await,
            SessionCommand::Shutdown { .. } => {}
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.state.status(),
            current: self.state.current().cloned(),
            position_secs: estimate_position(&self.state),
            volume: self.state.volume(),
            loop_enabled: self.state.loop_enabled(),
            queue_len: self.state.queue().len(),
            connected: self.backend.is_some(),
        }
    }

    fn enqueue(&mut self, track: TrackRef) -> Result<usize, PlaybackError> {
        let max = self.settings.max_queue_size;
        if self.state.queue().len() >= max {
            return Err(PlaybackError::QueueFull { max });
        }
        Ok(self.state.enqueue(track))
    }

    fn next_token(&mut self) -> SourceToken {
        self.next_token += 1;
        SourceToken(self.next_token)
    }

    fn end_signal(&mut self) -> EndSignal {
        let token = self.next_token();
        EndSignal::new(self.guild_id, token, self.handle.tx.clone())
    }

    /// Adquiere `track` y lo arranca en el backend desde `offset_secs`.
    ///
    /// Si la descarga falla se intenta el streaming directo. Si el backend rechaza la
    /// fuente, el estado de la sesión queda como estaba.
    async fn start_track(&mut self, track: TrackRef, offset_secs: u64, record_history: bool) -> Result<(), PlaybackError> {
        let backend = self.backend.clone().ok_or(PlaybackError::NotConnected)?;

        let (acquired, acquisition_error) = match self.acquirer.acquire(self.guild_id, &track).await {
            Ok(acquired) => (acquired, None),
            Err(e) => {
                warn!("⚠️ Descarga fallida para {}: {}. Probando streaming directo", track.title, e);
                match PlayableHandle::direct_stream(&track) {
                    Some(handle) => (AcquiredTrack { handle, lease: None }, Some(e)),
                    None => return Err(e.into()),
                }
            }
        };

        let signal = self.end_signal();
        let token = signal.token();
        let volume = self.state.volume();

        if let Err(e) = backend
            .start_source(&acquired.handle, volume, Duration::from_secs(offset_secs), signal)
            .await
        {
            error!("❌ No se pudo iniciar {}: {}", track.title, e);
            return Err(match acquisition_error {
                Some(acquisition) => PlaybackError::Unplayable {
                    acquisition,
                    fallback: e,
                },
                None => e.into(),
            });
        }

        info!("🎵 Reproduciendo: {} (guild {})", track.title, self.guild_id);
        let previous = self.active.replace(ActiveSource {
            token,
            handle: acquired.handle,
            lease: acquired.lease,
        });

        self.state.remove_queued(&track);
        self.state.begin_track(track, offset_secs, record_history, Instant::now());
        self.release(previous);
        self.start_reporter();
        Ok(())
    }

    /// Vuelve a arrancar la fuente activa desde `offset_secs` sin descargarla otra vez.
    async fn restart_current(&mut self, offset_secs: u64) -> Result<(), PlaybackError> {
        let backend = self.backend.clone().ok_or(PlaybackError::NotConnected)?;
        let (Some(track), Some(active)) = (self.state.current().cloned(), self.active.as_ref()) else {
            return Ok(());
        };
        let handle = active.handle.clone();

        let signal = self.end_signal();
        let token = signal.token();
        backend
            .start_source(&handle, self.state.volume(), Duration::from_secs(offset_secs), signal)
            .await?;

        if let Some(active) = self.active.as_mut() {
            active.token = token;
        }
        self.state.begin_track(track, offset_secs, false, Instant::now());
        Ok(())
    }

    async fn on_source_ended(&mut self, token: SourceToken) {
        // Fuentes reemplazadas, detenidas o re-arrancadas por un seek también avisan al
        // terminar; solo cuenta el fin de la fuente activa.
        if self.active.as_ref().map(|active| active.token) != Some(token) {
            debug!("Fin de fuente obsoleta {:?} ignorado en guild {}", token, self.guild_id);
            return;
        }
        self.finish_and_drain().await;
    }

    /// Cierra el track actual (con re-encolado si hay loop) y avanza la cola.
    async fn finish_and_drain(&mut self) -> Option<TrackRef> {
        let finished_source = self.active.take();
        if let Some(finished) = self.state.finish_current(Instant::now()) {
            debug!("Track terminado: {}", finished.title);
            if self.state.loop_enabled() {
                self.state.enqueue(finished);
            }
        }
        self.release(finished_source);
        self.drain().await
    }

    async fn drain(&mut self) -> Option<TrackRef> {
        while let Some(next) = self.state.pop_next() {
            match self.start_track(next.clone(), 0, true).await {
                Ok(()) => return Some(next),
                Err(PlaybackError::NotConnected) => {
                    // Sin conexión de voz la cola se conserva para cuando vuelva.
                    self.state.enqueue_front(next);
                    return None;
                }
                Err(e) => warn!("⚠️ Saltando {} en guild {}: {}", next.title, self.guild_id, e),
            }
        }

        info!("📭 Cola terminada en guild {}", self.guild_id);
        self.schedule_idle_check();
        None
    }

    async fn skip(&mut self) -> SkipOutcome {
        if self.state.current().is_none() {
            return SkipOutcome::NothingPlaying;
        }
        if let Some(backend) = &self.backend {
            backend.stop().await;
        }
        SkipOutcome::Skipped {
            next: self.finish_and_drain().await,
        }
    }

    async fn stop(&mut self) -> bool {
        let was_playing = self.state.current().is_some();
        self.teardown().await;
        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        was_playing
    }

    /// Detiene la fuente, vacía cola y track actual y libera el artefacto.
    async fn teardown(&mut self) {
        if let Some(backend) = &self.backend {
            backend.stop().await;
        }
        self.reporter.cancel(self.guild_id);
        self.state.stop(Instant::now());
        let active = self.active.take();
        self.release(active);
    }

    async fn pause(&mut self) -> bool {
        if self.state.status() != PlaybackStatus::Playing {
            return false;
        }
        let Some(backend) = self.backend.clone() else {
            return false;
        };
        if let Err(e) = backend.pause().await {
            warn!("⚠️ No se pudo pausar en guild {}: {}", self.guild_id, e);
            return false;
        }
        // El ancla guarda segundos enteros: cada pausa descarta la fracción en curso.
        let position = estimate_position(&self.state);
        self.state.set_paused(true, position, Instant::now());
        info!("⏸️ Reproducción pausada en {}s", position);
        true
    }

    async fn resume(&mut self) -> bool {
        if self.state.status() != PlaybackStatus::Paused {
            return false;
        }
        let Some(backend) = self.backend.clone() else {
            return false;
        };
        if let Err(e) = backend.resume().await {
            warn!("⚠️ No se pudo reanudar en guild {}: {}", self.guild_id, e);
            return false;
        }
        let position = estimate_position(&self.state);
        self.state.set_paused(false, position, Instant::now());
        info!("▶️ Reproducción reanudada en {}s", position);
        true
    }

    async fn seek(&mut self, target_secs: u64) -> Result<SeekOutcome, PlaybackError> {
        let Some(current) = self.state.current() else {
            return Ok(SeekOutcome::NothingPlaying);
        };
        // Se valida contra la duración obtenida al resolver el track.
        if let Some(duration) = current.duration {
            if target_secs > duration.as_secs() {
                return Ok(SeekOutcome::BeyondDuration { duration });
            }
        }

        self.restart_current(target_secs).await?;
        info!("⏩ Seek a {}s en guild {}", target_secs, self.guild_id);
        Ok(SeekOutcome::Seeked(target_secs))
    }

    async fn set_volume(&mut self, volume: f32) -> f32 {
        let applied = self.state.set_volume(volume);
        if self.active.is_some() {
            if let Some(backend) = &self.backend {
                if let Err(e) = backend.set_volume(applied).await {
                    warn!("⚠️ No se pudo aplicar el volumen en guild {}: {}", self.guild_id, e);
                }
            }
        }
        info!("🔊 Volumen ajustado a {}%", (applied * 100.0).round() as u16);
        applied
    }

    async fn previous(&mut self) -> Result<PreviousOutcome, PlaybackError> {
        let threshold = self.settings.previous_restart_threshold.as_secs();
        let has_current = self.state.current().is_some();

        if has_current && estimate_position(&self.state) > threshold {
            self.restart_current(0).await?;
            return Ok(PreviousOutcome::Restarted);
        }

        match self.state.pop_history() {
            Some(previous) => {
                let current = self.state.current().cloned();
                if let Err(e) = self.start_track(previous.clone(), 0, false).await {
                    self.state.push_history(previous);
                    return Err(e);
                }
                if let Some(current) = current {
                    self.state.enqueue_front(current);
                }
                info!("⏮️ Volviendo a: {}", previous.title);
                Ok(PreviousOutcome::Playing(previous))
            }
            None if has_current => {
                self.restart_current(0).await?;
                Ok(PreviousOutcome::Restarted)
            }
            None => Ok(PreviousOutcome::Nothing),
        }
    }

    /// Suelta la reserva de una fuente que dejó de estar activa y programa limpieza.
    fn release(&self, source: Option<ActiveSource>) {
        let Some(source) = source else {
            return;
        };
        if let Some(lease) = source.lease {
            debug!("Liberando artefacto {}", lease.stem());
            drop(lease);
            self.acquirer.store().schedule_sweep(self.settings.cleanup);
        }
    }

    fn start_reporter(&self) {
        if let Some(surface) = &self.display {
            self.reporter
                .start(self.guild_id, self.handle.clone(), surface.clone());
        }
    }

    fn schedule_idle_check(&self) {
        let Some(presence) = self.presence.clone() else {
            return;
        };
        let session = self.handle.clone();
        let grace = self.settings.idle_disconnect_after;
        let guild_id = self.guild_id;

        tokio::spawn(async move {
            let verdict = run_idle_check(session, presence, grace).await;
            debug!("Chequeo de inactividad en guild {}: {:?}", guild_id, verdict);
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{
        acquirer::{tests::FakeDownloader, ArtifactStore},
        error::BackendError,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Sesión falsa que responde a `Snapshot` con el valor compartido.
    pub(crate) fn scripted_session(guild_id: GuildId, snapshot: Arc<Mutex<SessionSnapshot>>) -> SessionHandle {
        let (tx, rx) = flume::unbounded::<SessionCommand>();
        tokio::spawn(async move {
            while let Ok(command) = rx.recv_async().await {
                if let SessionCommand::Snapshot { reply } = command {
                    let _ = reply.send(snapshot.lock().clone());
                }
            }
        });
        SessionHandle::new(guild_id, tx)
    }

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub started: Mutex<Vec<(PlayableHandle, Duration)>>,
        pub signals: Mutex<Vec<EndSignal>>,
        pub volumes: Mutex<Vec<f32>>,
        pub stops: AtomicUsize,
        pub fail_start: AtomicBool,
        pub panic_on_pause: AtomicBool,
    }

    impl FakeBackend {
        /// Simula el fin natural de la fuente más reciente.
        pub fn finish_latest(&self) {
            if let Some(signal) = self.signals.lock().pop() {
                signal.fire();
            }
        }
    }

    #[async_trait]
    impl VoiceBackend for FakeBackend {
        async fn start_source(
            &self,
            source: &PlayableHandle,
            volume: f32,
            seek: Duration,
            on_end: EndSignal,
        ) -> Result<(), BackendError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(BackendError::Start("transcoder caído".to_string()));
            }
            self.started.lock().push((source.clone(), seek));
            self.volumes.lock().push(volume);
            self.signals.lock().push(on_end);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn pause(&self) -> Result<(), BackendError> {
            if self.panic_on_pause.load(Ordering::SeqCst) {
                panic!("backend de prueba roto");
            }
            Ok(())
        }

        async fn resume(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn set_volume(&self, volume: f32) -> Result<(), BackendError> {
            self.volumes.lock().push(volume);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakePresence {
        pub listeners: Mutex<Option<usize>>,
        pub disconnects: AtomicUsize,
    }

    #[async_trait]
    impl VoicePresence for FakePresence {
        async fn listeners(&self, _guild_id: GuildId) -> Option<usize> {
            *self.listeners.lock()
        }

        async fn disconnect(&self, _guild_id: GuildId) -> anyhow::Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        tmp: TempDir,
        engine: PlaybackEngine,
        backend: Arc<FakeBackend>,
        presence: Arc<FakePresence>,
    }

    const GUILD: GuildId = GuildId::new(42);

    async fn harness(download_fails: bool) -> Harness {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(tmp.path()));
        let acquirer = Arc::new(TrackAcquirer::new(
            Arc::new(FakeDownloader { fail: download_fails }),
            store,
        ));
        let engine = PlaybackEngine::new(acquirer, EngineSettings::default());
        let backend = Arc::new(FakeBackend::default());
        let presence = Arc::new(FakePresence::default());
        *presence.listeners.lock() = Some(0);

        engine
            .connect(GUILD, backend.clone(), presence.clone())
            .await
            .unwrap();

        Harness {
            tmp,
            engine,
            backend,
            presence,
        }
    }

    fn track(name: &str) -> TrackRef {
        TrackRef::remote(name, format!("https://cdn/{name}"), format!("https://site/{name}"))
            .with_stable_id(name)
            .with_duration(Duration::from_secs(200))
    }

    fn titles(tracks: &[TrackRef]) -> Vec<String> {
        tracks.iter().map(|t| t.title.clone()).collect()
    }

    fn artifact_names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Espera (con tiempo real) a que la limpieza en segundo plano deje `dir` como se espera.
    async fn wait_for_artifacts(dir: &std::path::Path, done: impl Fn(&[String]) -> bool) -> Vec<String> {
        for _ in 0..200 {
            let names = artifact_names(dir);
            if done(&names) {
                return names;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        artifact_names(dir)
    }

    #[tokio::test(start_paused = true)]
    async fn plays_queue_to_the_end_and_disconnects_when_idle() {
        let h = harness(false).await;
        h.engine.enqueue(GUILD, track("A")).await.unwrap();
        h.engine.enqueue(GUILD, track("B")).await.unwrap();

        h.engine.play(GUILD, track("A")).await.unwrap();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
        assert_eq!(titles(&h.engine.queue_snapshot(GUILD).await.unwrap()), vec!["B"]);

        h.backend.finish_latest();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("B".to_string()));
        assert_eq!(snap.queue_len, 0);

        h.backend.finish_latest();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(snap.current.is_none());

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(h.presence.disconnects.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.presence.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_check_keeps_the_call_when_listeners_remain() {
        let h = harness(false).await;
        *h.presence.listeners.lock() = Some(2);

        h.engine.play(GUILD, track("A")).await.unwrap();
        h.backend.finish_latest();
        h.engine.snapshot(GUILD).await.unwrap();

        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(h.presence.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drains_in_fifo_order_and_loop_requeues() {
        let h = harness(false).await;
        for name in ["A", "B", "C"] {
            h.engine.enqueue(GUILD, track(name)).await.unwrap();
        }

        let mut played = Vec::new();
        let first = h.engine.skip(GUILD).await.unwrap();
        assert_eq!(first, SkipOutcome::NothingPlaying);

        h.engine.play_or_enqueue(GUILD, track("A")).await.unwrap();
        played.push(h.engine.snapshot(GUILD).await.unwrap().current.unwrap().title);

        assert!(h.engine.toggle_loop(GUILD).await.unwrap());
        h.backend.finish_latest();
        played.push(h.engine.snapshot(GUILD).await.unwrap().current.unwrap().title);

        assert_eq!(played, vec!["A", "B"]);
        // A terminó con loop activo: vuelve al final de la cola.
        assert_eq!(titles(&h.engine.queue_snapshot(GUILD).await.unwrap()), vec!["C", "A"]);
    }

    #[tokio::test]
    async fn play_or_enqueue_queues_behind_the_current_track() {
        let h = harness(false).await;
        assert_eq!(
            h.engine.play_or_enqueue(GUILD, track("A")).await.unwrap(),
            PlayOutcome::Started
        );
        assert_eq!(
            h.engine.play_or_enqueue(GUILD, track("B")).await.unwrap(),
            PlayOutcome::Queued(1)
        );
        assert_eq!(
            h.engine.play_or_enqueue(GUILD, track("C")).await.unwrap(),
            PlayOutcome::Queued(2)
        );

        let skipped = h.engine.skip(GUILD).await.unwrap();
        assert_eq!(skipped, SkipOutcome::Skipped { next: Some(track("B")) });
    }

    #[tokio::test(start_paused = true)]
    async fn seek_reanchors_position() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.engine.seek(GUILD, 90).await.unwrap(), SeekOutcome::Seeked(90));
        let position = h.engine.snapshot(GUILD).await.unwrap().position_secs;
        assert!((89..=91).contains(&position));

        let (handle, offset) = h.backend.started.lock().last().cloned().unwrap();
        assert!(handle.is_local());
        assert_eq!(offset, Duration::from_secs(90));

        // Un seek no consume ni agrega historial.
        h.engine.play(GUILD, track("B")).await.unwrap();
        assert_eq!(h.engine.previous(GUILD).await.unwrap(), PreviousOutcome::Playing(track("A")));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_relative_clamps_at_zero() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            h.engine.seek_relative(GUILD, -15).await.unwrap(),
            SeekOutcome::Seeked(0)
        );
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().position_secs, 0);
    }

    #[tokio::test]
    async fn seek_validates_against_cached_duration() {
        let h = harness(false).await;
        assert_eq!(h.engine.seek(GUILD, 10).await.unwrap(), SeekOutcome::NothingPlaying);

        h.engine.play(GUILD, track("A")).await.unwrap();
        assert_eq!(
            h.engine.seek(GUILD, 201).await.unwrap(),
            SeekOutcome::BeyondDuration {
                duration: Duration::from_secs(200)
            }
        );
        assert_eq!(h.engine.seek(GUILD, 200).await.unwrap(), SeekOutcome::Seeked(200));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_only_from_matching_state() {
        let h = harness(false).await;
        assert!(!h.engine.pause(GUILD).await.unwrap());

        h.engine.play(GUILD, track("A")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(h.engine.pause(GUILD).await.unwrap());
        assert!(!h.engine.pause(GUILD).await.unwrap());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let paused = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(paused.status, PlaybackStatus::Paused);
        assert_eq!(paused.position_secs, 20);

        assert!(h.engine.resume(GUILD).await.unwrap());
        assert!(!h.engine.resume(GUILD).await.unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().position_secs, 25);
    }

    #[tokio::test]
    async fn volume_is_clamped_to_range() {
        let h = harness(false).await;
        assert_eq!(h.engine.set_volume(GUILD, 250).await.unwrap(), 200);
        assert_eq!(h.engine.set_volume(GUILD, -10).await.unwrap(), 0);

        h.engine.set_volume(GUILD, 80).await.unwrap();
        h.engine.play(GUILD, track("A")).await.unwrap();
        assert_eq!(h.backend.volumes.lock().last().copied(), Some(0.8));

        h.engine.set_volume(GUILD, 50).await.unwrap();
        assert_eq!(h.backend.volumes.lock().last().copied(), Some(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn previous_restarts_or_goes_back() {
        let h = harness(false).await;
        assert_eq!(h.engine.previous(GUILD).await.unwrap(), PreviousOutcome::Nothing);

        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.play(GUILD, track("B")).await.unwrap();

        // Más allá del umbral: reinicia B.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.engine.previous(GUILD).await.unwrap(), PreviousOutcome::Restarted);
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().position_secs, 0);

        // Dentro del umbral: vuelve a A y B pasa al frente de la cola.
        assert_eq!(h.engine.previous(GUILD).await.unwrap(), PreviousOutcome::Playing(track("A")));
        assert_eq!(titles(&h.engine.queue_snapshot(GUILD).await.unwrap()), vec!["B"]);

        // Sin historial: reinicia el actual.
        assert_eq!(h.engine.previous(GUILD).await.unwrap(), PreviousOutcome::Restarted);
    }

    #[tokio::test]
    async fn stale_end_signal_is_ignored() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.play(GUILD, track("B")).await.unwrap();

        // El fin de A llega tarde, después de que B la reemplazó.
        let stale = h.backend.signals.lock().remove(0);
        stale.fire();

        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("B".to_string()));
    }

    #[tokio::test]
    async fn stop_clears_everything_and_ignores_the_resulting_end() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.enqueue(GUILD, track("B")).await.unwrap();

        assert!(h.engine.stop(GUILD).await.unwrap());
        h.backend.finish_latest();

        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert_eq!(snap.queue_len, 0);
        assert!(h.backend.stops.load(Ordering::SeqCst) >= 1);
        assert!(!h.engine.stop(GUILD).await.unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_streaming_when_download_fails() {
        let h = harness(true).await;
        h.engine.play(GUILD, track("A")).await.unwrap();

        let (handle, _) = h.backend.started.lock().last().cloned().unwrap();
        assert_eq!(
            handle,
            PlayableHandle::Stream {
                url: "https://cdn/A".to_string(),
                headers: Default::default(),
            }
        );
    }

    #[tokio::test]
    async fn download_and_stream_both_failing_is_unplayable() {
        let h = harness(true).await;
        h.backend.fail_start.store(true, Ordering::SeqCst);

        let err = h.engine.play(GUILD, track("A")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Unplayable { .. }));
    }

    #[tokio::test]
    async fn backend_failure_leaves_state_untouched() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.enqueue(GUILD, track("B")).await.unwrap();

        h.backend.fail_start.store(true, Ordering::SeqCst);
        let err = h.engine.play(GUILD, track("B")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Backend(BackendError::Start(_))));

        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("A".to_string()));
        assert_eq!(titles(&h.engine.queue_snapshot(GUILD).await.unwrap()), vec!["B"]);
    }

    #[tokio::test]
    async fn drain_skips_tracks_that_fail_to_start() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine
            .enqueue(GUILD, TrackRef::local("roto", "/no/existe.mp3"))
            .await
            .unwrap();
        h.engine.enqueue(GUILD, track("C")).await.unwrap();

        h.backend.finish_latest();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("C".to_string()));
    }

    #[tokio::test]
    async fn queue_limit_and_removal() {
        let tmp = TempDir::new().unwrap();
        let acquirer = Arc::new(TrackAcquirer::new(
            Arc::new(FakeDownloader { fail: false }),
            Arc::new(ArtifactStore::new(tmp.path())),
        ));
        let settings = EngineSettings {
            max_queue_size: 2,
            ..EngineSettings::default()
        };
        let engine = PlaybackEngine::new(acquirer, settings);

        engine.enqueue(GUILD, track("A")).await.unwrap();
        engine.enqueue(GUILD, track("B")).await.unwrap();
        let err = engine.enqueue(GUILD, track("C")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::QueueFull { max: 2 }));

        assert_eq!(engine.remove_from_queue(GUILD, 0).await.unwrap(), Some(track("A")));
        assert_eq!(engine.remove_from_queue(GUILD, 5).await.unwrap(), None);
        assert_eq!(engine.clear_queue(GUILD).await.unwrap(), 1);

        // Sin conexión de voz no se puede reproducir.
        let err = engine.play(GUILD, track("A")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotConnected));
    }

    #[tokio::test]
    async fn disconnected_resets_the_session() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.enqueue(GUILD, track("B")).await.unwrap();

        h.engine.disconnected(GUILD).await.unwrap();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert_eq!(snap.queue_len, 0);

        let err = h.engine.play(GUILD, track("A")).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NotConnected));
    }

    #[tokio::test]
    async fn guilds_are_independent() {
        let h = harness(false).await;
        let other = GuildId::new(43);

        h.engine.play(GUILD, track("A")).await.unwrap();
        h.engine.enqueue(other, track("X")).await.unwrap();

        assert_eq!(h.engine.snapshot(other).await.unwrap().status, PlaybackStatus::Idle);
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().queue_len, 0);

        h.engine.shutdown().await;
        assert!(!h.engine.has_session(GUILD));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_seek_offsets_saturate_instead_of_killing_the_session() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(matches!(
            h.engine.seek_relative(GUILD, i64::MAX).await.unwrap(),
            SeekOutcome::BeyondDuration { .. }
        ));
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().status, PlaybackStatus::Playing);

        // Sin duración conocida cualquier destino se acepta y la estimación satura.
        let live = TrackRef::remote("directo", "https://cdn/live", "https://site/live");
        h.engine.play(GUILD, live).await.unwrap();
        assert_eq!(h.engine.seek(GUILD, u64::MAX).await.unwrap(), SeekOutcome::Seeked(u64::MAX));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.snapshot(GUILD).await.unwrap().position_secs, u64::MAX);
    }

    #[tokio::test]
    async fn dead_session_is_replaced_on_next_use() {
        let h = harness(false).await;
        h.engine.play(GUILD, track("A")).await.unwrap();
        assert!(h.engine.snapshot(GUILD).await.unwrap().connected);

        h.backend.panic_on_pause.store(true, Ordering::SeqCst);
        let err = h.engine.pause(GUILD).await.unwrap_err();
        assert!(matches!(err, PlaybackError::SessionClosed));

        // La sesión nueva responde, pero hay que volver a registrar la voz.
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.status, PlaybackStatus::Idle);
        assert!(!snap.connected);

        h.backend.panic_on_pause.store(false, Ordering::SeqCst);
        h.engine
            .connect(GUILD, h.backend.clone(), h.presence.clone())
            .await
            .unwrap();
        h.engine.play(GUILD, track("B")).await.unwrap();
        assert!(h.engine.pause(GUILD).await.unwrap());
    }

    #[tokio::test]
    async fn finished_artifact_is_removed_while_the_current_one_stays() {
        let h = harness(false).await;
        h.engine.enqueue(GUILD, track("B")).await.unwrap();
        h.engine.play(GUILD, track("A")).await.unwrap();
        assert_eq!(artifact_names(h.tmp.path()).len(), 1);

        h.backend.finish_latest();
        let snap = h.engine.snapshot(GUILD).await.unwrap();
        assert_eq!(snap.current.map(|t| t.title), Some("B".to_string()));

        let names = wait_for_artifacts(h.tmp.path(), |names| names.iter().all(|n| !n.starts_with("A_"))).await;
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("B_"));
    }

    #[tokio::test]
    async fn disconnect_while_idle_still_cleans_leftovers() {
        let h = harness(false).await;
        std::fs::write(h.tmp.path().join("resto_de_antes.webm"), b"x").unwrap();

        h.engine.disconnected(GUILD).await.unwrap();

        let names = wait_for_artifacts(h.tmp.path(), |names| names.is_empty()).await;
        assert!(names.is_empty());
    }
}
