use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info};

use super::track::TrackRef;

pub const DEFAULT_VOLUME: f32 = 0.3;
pub const MAX_VOLUME: f32 = 2.0;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Estado de reproducción derivado de `current` y `paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

/// Segundos transcurridos en el último límite (play/pause/resume/seek) y el instante
/// que les corresponde. Siempre se reemplaza entero, nunca campo por campo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionAnchor {
    pub offset_secs: u64,
    pub at: Instant,
}

impl PositionAnchor {
    pub fn new(offset_secs: u64, at: Instant) -> Self {
        Self { offset_secs, at }
    }
}

/// Estado mutable de una sesión de voz (uno por guild).
#[derive(Debug)]
pub struct SessionState {
    queue: VecDeque<TrackRef>,
    history: VecDeque<TrackRef>,
    history_limit: usize,
    current: Option<TrackRef>,
    loop_enabled: bool,
    paused: bool,
    volume: f32,
    anchor: PositionAnchor,
}

impl SessionState {
    pub fn new(volume: f32, history_limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            history: VecDeque::new(),
            history_limit,
            current: None,
            loop_enabled: false,
            paused: false,
            volume: volume.clamp(0.0, MAX_VOLUME),
            anchor: PositionAnchor::new(0, Instant::now()),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        match (&self.current, self.paused) {
            (None, _) => PlaybackStatus::Idle,
            (Some(_), true) => PlaybackStatus::Paused,
            (Some(_), false) => PlaybackStatus::Playing,
        }
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &VecDeque<TrackRef> {
        &self.queue
    }

    pub fn history(&self) -> &VecDeque<TrackRef> {
        &self.history
    }

    pub fn anchor(&self) -> PositionAnchor {
        self.anchor
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Reancla la posición: ambos campos en una sola asignación.
    pub fn reanchor(&mut self, offset_secs: u64, now: Instant) {
        self.anchor = PositionAnchor::new(offset_secs, now);
    }

    /// Entra en Playing con `track` desde `offset_secs`.
    ///
    /// Con `record_history` el track anterior (si lo hay) pasa al historial. Un seek del
    /// mismo track o un "previous" lo reemplazan sin consumir historial.
    pub fn begin_track(&mut self, track: TrackRef, offset_secs: u64, record_history: bool, now: Instant) {
        if let Some(previous) = self.current.take() {
            if record_history {
                self.push_history(previous);
            }
        }
        self.current = Some(track);
        self.paused = false;
        self.reanchor(offset_secs, now);
    }

    /// Entra en Idle. Devuelve el track que terminó, ya registrado en el historial.
    pub fn finish_current(&mut self, now: Instant) -> Option<TrackRef> {
        let finished = self.current.take()?;
        self.push_history(finished.clone());
        self.paused = false;
        self.reanchor(0, now);
        Some(finished)
    }

    /// Detiene todo: vacía la cola y el track actual (sin tocar el historial).
    pub fn stop(&mut self, now: Instant) {
        self.queue.clear();
        self.current = None;
        self.paused = false;
        self.reanchor(0, now);
    }

    pub fn set_paused(&mut self, paused: bool, offset_secs: u64, now: Instant) {
        self.paused = paused;
        self.reanchor(offset_secs, now);
    }

    pub fn push_history(&mut self, track: TrackRef) {
        self.history.push_back(track);
        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                debug!("📜 Historial lleno, descartando: {}", evicted.title);
            }
        }
    }

    pub fn pop_history(&mut self) -> Option<TrackRef> {
        self.history.pop_back()
    }

    pub fn enqueue(&mut self, track: TrackRef) -> usize {
        info!("➕ Agregado a la cola: {}", track.title);
        self.queue.push_back(track);
        self.queue.len()
    }

    pub fn enqueue_front(&mut self, track: TrackRef) {
        self.queue.push_front(track);
    }

    pub fn pop_next(&mut self) -> Option<TrackRef> {
        self.queue.pop_front()
    }

    pub fn remove_at(&mut self, index: usize) -> Option<TrackRef> {
        self.queue.remove(index)
    }

    /// Quita la primera aparición de `track` en la cola (si está).
    pub fn remove_queued(&mut self, track: &TrackRef) -> bool {
        match self.queue.iter().position(|queued| queued.is_same_track(track)) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear_queue(&mut self) -> usize {
        let cleared = self.queue.len();
        self.queue.clear();
        cleared
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.volume
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME, DEFAULT_HISTORY_LIMIT)
    }
}
