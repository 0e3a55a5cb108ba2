mod config;
mod logging;
mod state;

use std::{process::ExitCode, sync::Arc, time::Duration};

use chat_core::ChatCommand;
use chat_laddrs::{LaddrsRuntimeHandle, spawn_runtime};
use chat_platform::{PushTransport, WebSocketPushTransport};
use config::ChatConfig;
use state::ChatView;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast::error::RecvError, mpsc},
};
use tracing::{debug, error, info, warn};

const RELOAD_PAUSE: Duration = Duration::from_secs(1);

enum SessionEnd {
    Reload,
    Quit,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting laddrs-chat");

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("laddrs-chat: {err}");
            return ExitCode::FAILURE;
        }
    };
    let transport: Arc<dyn PushTransport> =
        match WebSocketPushTransport::new(config.socket_url.clone()) {
            Ok(transport) => Arc::new(transport),
            Err(err) => {
                error!(error = %err, "invalid push endpoint");
                eprintln!("laddrs-chat: {err}");
                return ExitCode::FAILURE;
            }
        };

    let mut input = spawn_stdin_reader();
    loop {
        match run_session(&config, transport.clone(), &mut input).await {
            SessionEnd::Reload => {
                info!("restarting chat client after reload request");
                tokio::time::sleep(RELOAD_PAUSE).await;
            }
            SessionEnd::Quit => break,
        }
    }

    info!("laddrs-chat exiting");
    ExitCode::SUCCESS
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (line_tx, line_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
    });
    line_rx
}

async fn run_session(
    config: &ChatConfig,
    transport: Arc<dyn PushTransport>,
    input: &mut mpsc::Receiver<String>,
) -> SessionEnd {
    let handle = spawn_runtime(config.runtime_config(), transport);
    let mut events = handle.subscribe();
    let mut view = ChatView::default();

    let startup = [
        ChatCommand::Start {
            ladder_name: config.ladder_name.clone(),
            user_id: config.user_id.clone(),
        },
        ChatCommand::SetAttention {
            focused: true,
            transcript_visible: true,
        },
    ];
    for command in startup {
        if let Err(err) = handle.send(command).await {
            error!(error = %err, "chat runtime unavailable");
            return SessionEnd::Quit;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    for line in view.handle_event(event) {
                        println!("{line}");
                    }
                    if view.reload_requested() {
                        return SessionEnd::Reload;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat view fell behind; events dropped");
                }
                Err(RecvError::Closed) => return SessionEnd::Quit,
            },
            line = input.recv() => {
                let Some(line) = line else {
                    return SessionEnd::Quit;
                };
                view.mark_seen();
                if !handle_input(&handle, &mut view, line.trim()).await {
                    return SessionEnd::Quit;
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn handle_input(handle: &LaddrsRuntimeHandle, view: &mut ChatView, line: &str) -> bool {
    let text = match line {
        "/quit" => return false,
        "/who" => {
            let online = view.snapshot().online;
            println!("-- Online: {}", online.join(", "));
            return true;
        }
        "/status" => {
            let status = handle.status();
            println!(
                "-- {} [{:?}] (sending {})",
                view.snapshot().status_text,
                status.state,
                if status.sending_enabled { "enabled" } else { "disabled" }
            );
            return true;
        }
        "/retry" => match view.take_restored_draft() {
            Some(draft) => draft,
            None => {
                println!("-- Nothing to retry.");
                return true;
            }
        },
        _ => line.to_owned(),
    };

    if !view.snapshot().revealed {
        println!("-- Chat is not connected yet.");
        return true;
    }
    debug!("sending chat line");
    if let Err(err) = handle.send(ChatCommand::SendChat { text }).await {
        error!(error = %err, "chat runtime unavailable");
        return false;
    }
    true
}
