use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use guild_player::{
    audio::{
        acquirer::{ArtifactStore, TrackAcquirer},
        engine::{EngineSettings, PlaybackEngine},
    },
    bot::GuildPlayerBot,
    config::Config,
    sources::YtDlpClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_player=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Player v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    let ytdlp = Arc::new(YtDlpClient::new(config.ytdlp_path.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&ytdlp).await;
    }

    info!("{}", config.summary());

    // Nada de una ejecución anterior puede estar en uso
    let store = Arc::new(ArtifactStore::new(config.downloads_dir.clone()));
    store.prepare().await?;

    let acquirer = Arc::new(TrackAcquirer::new(ytdlp.clone(), store));
    let engine = PlaybackEngine::new(acquirer, EngineSettings::from(config.as_ref()));
    let http_client = reqwest::Client::new();

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = GuildPlayerBot::new(config.clone(), engine.clone(), ytdlp, http_client);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        engine.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(ytdlp: &YtDlpClient) -> Result<()> {
    ytdlp.verify_dependencies().await?;
    println!("OK");
    Ok(())
}
