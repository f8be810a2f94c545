use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        playnow_command(),
        addqueue_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        previous_command(),
        seek_command(),
        volume_command(),
        loop_command(),
        queue_command(),
        removequeue_command(),
        clearqueue_command(),
        nowplaying_command(),
        leave_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn query_option() -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "query", "URL o término de búsqueda").required(true)
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción, o la agrega a la cola si ya hay música")
        .add_option(query_option())
}

fn playnow_command() -> CreateCommand {
    CreateCommand::new("playnow")
        .description("Reproduce una canción ya, reemplazando la actual")
        .add_option(query_option())
}

fn addqueue_command() -> CreateCommand {
    CreateCommand::new("addqueue")
        .description("Agrega una canción al final de la cola")
        .add_option(query_option())
}

// Comandos de control

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn previous_command() -> CreateCommand {
    CreateCommand::new("previous").description("Reinicia la canción o vuelve a la anterior")
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Salta a un punto de la canción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "position",
                "Posición (1:30, 90) o desplazamiento (+10, -15)",
            )
            .required(true),
        )
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen (0-200)")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Nivel de volumen")
                .required(true),
        )
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Activa/desactiva la repetición de la cola")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

fn removequeue_command() -> CreateCommand {
    CreateCommand::new("removequeue")
        .description("Quita una canción de la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "index", "Posición en la cola")
                .min_int_value(1)
                .required(true),
        )
}

fn clearqueue_command() -> CreateCommand {
    CreateCommand::new("clearqueue").description("Vacía la cola sin detener la canción actual")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

// Comandos de conexión

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}
