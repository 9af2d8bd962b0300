//! Server entry point: CLI parsing, store bootstrap, accept loop, and the
//! save-on-shutdown hook.

mod account_store;
mod board;
mod game;
mod game_store;
mod movegen;
mod persist;
mod protocol;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use account_store::AccountStore;
use game_store::GameStore;
use persist::CommandAudit;
use protocol::Session;

const SERVERDATA_DIR: &str = "serverdata";

/// A persistent correspondence-chess server speaking a line-oriented TCP
/// protocol.
#[derive(Parser, Debug)]
#[command(name = "chesscorrespond")]
struct Cli {
    /// Port to listen on.
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let data_dir = PathBuf::from(SERVERDATA_DIR);
    if let Err(e) = tokio::fs::create_dir_all(&data_dir).await {
        log::error!("failed to create {}: {e}", data_dir.display());
        return ExitCode::FAILURE;
    }

    let accounts = match AccountStore::load(data_dir.join("accounts.csv"), data_dir.join("accounts.dump")).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("failed to load accounts: {e}");
            return ExitCode::FAILURE;
        }
    };

    let games = match GameStore::load(
        data_dir.join("active_games.csv"),
        data_dir.join("games"),
        data_dir.join("active_games.dump"),
        accounts.clone(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("failed to load games: {e}");
            return ExitCode::FAILURE;
        }
    };

    let audit = match CommandAudit::open(&data_dir.join("commands.log")).await {
        Ok(audit) => Arc::new(audit),
        Err(e) => {
            log::error!("failed to open command audit log: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", cli.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind port {}: {e}", cli.port);
            return ExitCode::FAILURE;
        }
    };
    log::info!("listening on port {}", cli.port);

    let accept_accounts = accounts.clone();
    let accept_games = games.clone();
    let accept_audit = audit.clone();
    let accept_loop = tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("accept error: {e}");
                    continue;
                }
            };
            log::debug!("accepted connection from {addr}");
            let accounts = accept_accounts.clone();
            let games = accept_games.clone();
            let audit = accept_audit.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                let mut session = Session::new(writer);
                session.run(reader, &accounts, &games, &audit, &addr.to_string()).await;
                log::debug!("connection from {addr} closed");
            });
        }
    });

    tokio::select! {
        _ = accept_loop => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received, saving state");
        }
    }

    accounts.save().await;
    games.save().await;
    ExitCode::SUCCESS
}
