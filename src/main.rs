use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use duocall::app::{App, Command};
use duocall::config::Args;
use duocall::logger;
use duocall::peer::{FileDevices, RtcLinkFactory};
use duocall::session::Participant;
use duocall::signaling::SignalingClient;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init();

    let identity: Participant = args
        .user
        .parse()
        .context("only alyona and kolia can use this client")?;
    let factory = Arc::new(RtcLinkFactory::new().context("failed to set up WebRTC")?);
    let devices = Arc::new(FileDevices::new(args.video.clone(), args.audio.clone()));

    let (client, channel, connection) =
        SignalingClient::connect(&args.server).context("bad signaling server address")?;
    info!("Signing in as {identity} via {}", args.server);

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let quit = commands_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit.send(Command::Quit);
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if commands_tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
    });

    println!("Commands: join, leave, video, audio, status, quit");
    App::new(identity, Arc::new(client.clone()), factory, devices)
        .with_auto_join(args.join)
        .run(channel, commands_rx)
        .await?;

    client.close();
    connection.await.context("signaling task panicked")?;
    Ok(())
}
