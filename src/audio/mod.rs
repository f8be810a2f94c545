//! # Audio Module
//!
//! Per-guild playback core.
//!
//! ## Architecture
//!
//! ### [`session`] and [`position`]
//! - Queue, bounded history, current track, loop/pause flags and volume per guild
//! - Estimated playback position from a re-anchored `(offset, instant)` pair
//!
//! ### [`acquirer`]
//! - Download-first acquisition into a shared directory, with per-download leases
//! - Bounded cleanup sweeps that tolerate files still held by the transcoder
//!
//! ### [`engine`]
//! - One actor task per guild owning its state; commands, end-of-source signals and
//!   timers are all messages to that actor
//! - Queue draining, streaming fallback and history-based "previous"
//!
//! ### [`progress`] and [`idle`]
//! - Recurring progress rendering to a display surface
//! - Delayed disconnect when the queue ends and nobody is listening
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_player::audio::{
//!     acquirer::{ArtifactStore, TrackAcquirer},
//!     engine::{EngineSettings, PlaybackEngine},
//!     track::TrackRef,
//! };
//! use guild_player::sources::YtDlpClient;
//! use serenity::all::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(ArtifactStore::new("./downloads"));
//! let acquirer = Arc::new(TrackAcquirer::new(Arc::new(YtDlpClient::new("yt-dlp")), store));
//! let engine = PlaybackEngine::new(acquirer, EngineSettings::default());
//! let guild_id = GuildId::new(123456789);
//!
//! let track = TrackRef::remote("Song", "https://cdn.example.com/a.m4a", "https://example.com/a");
//! engine.enqueue(guild_id, track).await?;
//! # Ok(())
//! # }
//! ```

pub mod acquirer;
pub mod backend;
pub mod engine;
pub mod error;
pub mod idle;
pub mod position;
pub mod progress;
pub mod session;
pub mod track;
