use std::error::Error;

use chat_pipeline::common::{Alignment, ChatMessage, WidgetCommand};
use chat_pipeline::config::{self, AppConfig};
use chat_pipeline::network::{GossipNode, HttpBackend, loopback};
use chat_pipeline::pipeline::{EventChannel, MessageBackend};
use chat_pipeline::widget::{ChatWidget, SessionContext, WidgetSinks};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const QUIT_COMMAND: &str = "/quit";

#[derive(Parser)]
#[command(
    name = "chat_pipeline",
    version,
    about = "Terminal client for the real-time chat channel"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Channel to subscribe to (overrides the config file)
    #[arg(long)]
    channel: Option<String>,
    /// Fixed session label instead of a generated one
    #[arg(long, value_name = "LABEL")]
    sender_label: Option<String>,
    /// Use an in-process loopback channel instead of the gossip network
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config).apply_env();
    if let Some(channel) = cli.channel {
        app_config.channel_name = channel;
    }

    let session = match cli.sender_label {
        Some(label) => SessionContext::with_id(label),
        None => SessionContext::activate(),
    };
    println!(
        "Chatting on {} as {} (type {QUIT_COMMAND} to leave)",
        app_config.channel_name,
        session.self_id()
    );

    let (command_tx, command_rx) = mpsc::channel(100);
    tokio::spawn(read_compose_input(command_tx));

    if cli.offline {
        let (channel, backend) = loopback();
        run_widget(&app_config, session, channel, backend, command_rx).await;
        return Ok(());
    }

    let (channel, broadcaster) = GossipNode::start(&app_config)?;
    match app_config.send_endpoint.as_deref() {
        Some(endpoint) => {
            log::info!("Sending through {endpoint}");
            let backend = HttpBackend::new(endpoint)?;
            run_widget(&app_config, session, channel, backend, command_rx).await;
        }
        None => {
            run_widget(&app_config, session, channel, broadcaster, command_rx).await;
        }
    }

    Ok(())
}

async fn run_widget<C, B>(
    app_config: &AppConfig,
    session: SessionContext,
    channel: C,
    backend: B,
    commands: mpsc::Receiver<WidgetCommand>,
) where
    C: EventChannel,
    B: MessageBackend,
{
    let mut widget =
        ChatWidget::activate(app_config, session, channel, backend, WidgetSinks::default()).await;
    widget.run(commands, render_message).await;
}

fn render_message(message: &ChatMessage) {
    let marker = match message.alignment() {
        Alignment::SelfAuthored => " (you)",
        Alignment::Other => "",
    };
    println!(
        "[{}] {}{marker}: {}",
        message.display_time(),
        message.sender(),
        message.text()
    );
}

/// Turns stdin lines into compose + send commands. Ctrl-C, EOF and the quit
/// command all tear the widget down.
async fn read_compose_input(commands: mpsc::Sender<WidgetCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                log::error!("Failed to read input: {err}");
                break;
            }
        };

        if line.trim() == QUIT_COMMAND {
            break;
        }
        if commands.send(WidgetCommand::Compose(line)).await.is_err()
            || commands.send(WidgetCommand::Send).await.is_err()
        {
            return;
        }
    }

    let _ = commands.send(WidgetCommand::Teardown).await;
}
