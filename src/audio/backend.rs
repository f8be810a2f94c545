//! Voice transport seam and its songbird implementation.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serenity::model::id::GuildId;
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{Track, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    engine::SessionCommand,
    error::BackendError,
    track::PlayableHandle,
};

/// Identifica cada fuente iniciada en una sesión. Crece monótonamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceToken(pub u64);

/// Señal de un solo uso "la fuente terminó".
///
/// Puede dispararse desde cualquier hilo (songbird ejecuta sus handlers en su propia
/// tarea de eventos): `fire` solo envía un mensaje al buzón de la sesión y nunca toca
/// estado compartido.
pub struct EndSignal {
    guild_id: GuildId,
    token: SourceToken,
    mailbox: flume::Sender<SessionCommand>,
}

impl EndSignal {
    pub(crate) fn new(guild_id: GuildId, token: SourceToken, mailbox: flume::Sender<SessionCommand>) -> Self {
        Self {
            guild_id,
            token,
            mailbox,
        }
    }

    pub fn token(&self) -> SourceToken {
        self.token
    }

    pub fn fire(self) {
        if self
            .mailbox
            .send(SessionCommand::SourceEnded { token: self.token })
            .is_err()
        {
            debug!("Sesión de guild {} cerrada, fin de fuente descartado", self.guild_id);
        }
    }
}

/// Capacidad de transporte de voz de una guild.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Reemplaza la fuente activa. Si falla, la anterior sigue sonando.
    async fn start_source(
        &self,
        source: &PlayableHandle,
        volume: f32,
        seek: Duration,
        on_end: EndSignal,
    ) -> Result<(), BackendError>;

    async fn stop(&self);

    async fn pause(&self) -> Result<(), BackendError>;

    async fn resume(&self) -> Result<(), BackendError>;

    async fn set_volume(&self, volume: f32) -> Result<(), BackendError>;
}

/// Backend sobre una llamada de songbird.
pub struct SongbirdBackend {
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    current: SyncMutex<Option<TrackHandle>>,
}

impl SongbirdBackend {
    pub fn new(call: Arc<Mutex<Call>>, http: reqwest::Client) -> Self {
        Self {
            call,
            http,
            current: SyncMutex::new(None),
        }
    }

    fn build_input(&self, source: &PlayableHandle) -> Input {
        match source {
            PlayableHandle::LocalFile(path) => File::new(path.clone()).into(),
            PlayableHandle::Stream { url, headers } => {
                HttpRequest::new_with_headers(self.http.clone(), url.clone(), header_map(headers)).into()
            }
        }
    }

    fn current(&self) -> Result<TrackHandle, BackendError> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| BackendError::Control("sin pista activa".to_string()))
    }
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn start_source(
        &self,
        source: &PlayableHandle,
        volume: f32,
        seek: Duration,
        on_end: EndSignal,
    ) -> Result<(), BackendError> {
        let input = self.build_input(source);

        // La pista nueva arranca pausada: la anterior solo se detiene si esta es reproducible.
        let handle = {
            let mut call = self.call.lock().await;
            call.play(Track::from(input).volume(volume).pause())
        };

        if let Err(e) = handle.make_playable_async().await {
            let _ = handle.stop();
            return Err(BackendError::Start(e.to_string()));
        }

        if !seek.is_zero() {
            if let Err(e) = handle.seek_async(seek).await {
                let _ = handle.stop();
                return Err(BackendError::Seek(e.to_string()));
            }
        }

        let signal = Arc::new(SyncMutex::new(Some(on_end)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    SourceEndNotifier {
                        signal: signal.clone(),
                    },
                )
                .map_err(|e| BackendError::Control(e.to_string()))?;
        }

        let previous = self.current.lock().replace(handle.clone());
        if let Some(previous) = previous {
            let _ = previous.stop();
        }

        handle.play().map_err(|e| BackendError::Start(e.to_string()))
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
        }
    }

    async fn pause(&self) -> Result<(), BackendError> {
        self.current()?
            .pause()
            .map_err(|e| BackendError::Control(e.to_string()))
    }

    async fn resume(&self) -> Result<(), BackendError> {
        self.current()?
            .play()
            .map_err(|e| BackendError::Control(e.to_string()))
    }

    async fn set_volume(&self, volume: f32) -> Result<(), BackendError> {
        self.current()?
            .set_volume(volume)
            .map_err(|e| BackendError::Control(e.to_string()))
    }
}

/// Reenvía End/Error de songbird como una única señal de fin al buzón de la sesión.
struct SourceEndNotifier {
    signal: Arc<SyncMutex<Option<EndSignal>>>,
}

#[async_trait]
impl VoiceEventHandler for SourceEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                debug!("Pista terminada con estado {:?}", state.playing);
            }
        }

        // Hilo de eventos de songbird: aquí solo se encola el mensaje, el actor de la
        // sesión es quien muta el estado.
        if let Some(signal) = self.signal.lock().take() {
            signal.fire();
        }

        Some(Event::Cancel)
    }
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Cabecera HTTP inválida ignorada: {}", name),
        }
    }
    map
}
