use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::console::spawn_console;
use server::network::Server;
use server::persistence;

/// Main-method of the application.
/// Loads the world, starts the server and the operator console, and saves the
/// world again on `exit` or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();

    let world = persistence::load(&config.state_file, &config.game_type)?;
    let server = Server::bind(&config, world).await?;
    let handle = server.handle();

    if !config.no_console {
        spawn_console(tokio::runtime::Handle::current(), handle.clone())?;
    }

    let mut server_task = tokio::spawn(server.run());

    let world = tokio::select! {
        result = &mut server_task => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            server_task.await?
        }
    };

    persistence::save(&config.state_file, &world)?;
    Ok(())
}
