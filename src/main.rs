use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use avatar_gateway::api::{ApiServer, ApiState, SessionFactory};
use avatar_gateway::backend::{AskClient, Reasoner};
use avatar_gateway::console::{ConsoleRecognizer, ConsoleSynthesizer, LoopbackTransport};
use avatar_gateway::session::Notice;
use avatar_gateway::transport::{DescriptorSource, LoopbackDescriptorSource, RelayTokenSource};
use avatar_gateway::{Config, Orchestrator, Providers, SessionHandle, SessionState};

/// Avatar - conversational session orchestrator for a talking avatar
#[derive(Parser)]
#[command(name = "avatar", version, about)]
struct Cli {
    /// Path to a config file (defaults to the user config directory)
    #[arg(short, long, env = "AVATAR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a console session (typed lines are spoken utterances)
    Run {
        /// Also serve the HTTP control surface on this port
        #[arg(long)]
        api_port: Option<u16>,

        /// Fetch relay credentials instead of using the loopback descriptor
        #[arg(long)]
        relay: bool,
    },
    /// Ask the backend a single question
    Ask {
        /// Question text
        question: String,
    },
    /// Fetch a relay descriptor and print a redacted summary
    Token,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "warn,avatar_gateway=info",
        1 => "info,avatar_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { api_port, relay } => run_console(config, api_port, relay).await,
        Command::Ask { question } => ask(&config, &question).await,
        Command::Token => token(&config).await,
    }
}

async fn ask(config: &Config, question: &str) -> anyhow::Result<()> {
    let client = AskClient::new(&config.backend)?;
    tracing::info!(url = client.url(), "asking backend");

    let answer = client.ask(question).await?;
    println!("{answer}");
    Ok(())
}

async fn token(config: &Config) -> anyhow::Result<()> {
    let source = RelayTokenSource::from_config(&config.relay)?;
    let descriptor = source.fetch().await?;

    println!("relays:");
    for url in &descriptor.relay_urls {
        println!("  {url}");
    }
    println!("username: {}", descriptor.username);
    println!(
        "credential: <redacted, {} chars>",
        descriptor.credential.expose_secret().len()
    );
    Ok(())
}

async fn run_console(mut config: Config, api_port: Option<u16>, relay: bool) -> anyhow::Result<()> {
    if api_port.is_some() {
        config.api.port = api_port;
    }

    let descriptors: Arc<dyn DescriptorSource> = if relay {
        Arc::new(RelayTokenSource::from_config(&config.relay)?)
    } else {
        Arc::new(LoopbackDescriptorSource)
    };
    let transport = LoopbackTransport::default();
    let recognizer = ConsoleRecognizer::default();

    let providers = Providers {
        descriptors,
        transport: Arc::new(transport.clone()),
        recognizer: Arc::new(recognizer.clone()),
        synthesizer: Arc::new(ConsoleSynthesizer::default()),
        reasoner: Arc::new(AskClient::new(&config.backend)?),
    };

    tracing::info!(
        backend = %config.backend.url,
        character = %config.avatar.character,
        voice = %config.avatar.voice,
        relay,
        "starting console session"
    );

    let session = Orchestrator::spawn(config.clone(), providers.clone());

    if let Some(port) = config.api.port {
        let factory_config = config.clone();
        let factory: SessionFactory =
            Arc::new(move || Orchestrator::spawn(factory_config.clone(), providers.clone()));
        let state = Arc::new(ApiState::with_session(session.clone(), factory));
        let _api_handle = ApiServer::new(state, port).spawn().await?;
        tracing::info!(port, "API server started");
    }

    let printer = tokio::spawn(print_notices(session.subscribe()));

    session.start_session()?;
    println!("Type to talk. Commands: /end /mic /camera /drop /status");

    // A failed start returns the session to idle with the error recorded
    let mut snapshots = session.watch();
    let start_failed =
        snapshots.wait_for(|s| s.state == SessionState::Idle && s.last_error.is_some());
    tokio::pin!(start_failed);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, &transport, &recognizer, line.trim()) {
                    break;
                }
            }
            _ = &mut start_failed => break,
            () = session.closed() => break,
        }
    }

    let _ = session.end_session();
    session.closed().await;
    printer.abort();

    let snapshot = session.snapshot();
    if let Some(error) = snapshot.last_error {
        anyhow::bail!(error);
    }
    Ok(())
}

/// Handle one typed line; returns false when the session should end
fn handle_line(
    session: &SessionHandle,
    transport: &LoopbackTransport,
    recognizer: &ConsoleRecognizer,
    line: &str,
) -> bool {
    let result = match line {
        "" => Ok(()),
        "/end" => return false,
        "/mic" => session.toggle_microphone(),
        "/camera" => session.toggle_local_camera(),
        "/drop" => {
            if !transport.drop_connection() {
                println!("not connected");
            }
            Ok(())
        }
        "/status" => {
            match serde_json::to_string_pretty(&session.snapshot()) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!(error = %e, "failed to render snapshot"),
            }
            Ok(())
        }
        text => {
            if !recognizer.hear(text) {
                println!("microphone is off (/mic to turn it on)");
            }
            Ok(())
        }
    };

    result.is_ok()
}

async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        let notice = match notices.recv().await {
            Ok(notice) => notice,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        match notice {
            Notice::StateChanged { to, .. } => println!("[{to}]"),
            Notice::Status { text } => println!("  {text}"),
            Notice::QueryDispatched { text } => println!("you> {text}"),
            Notice::SpeechCancelled { .. } => println!("  (interrupted)"),
            Notice::Reconnecting { attempt } => println!("  reconnect attempt {attempt}"),
            Notice::FatalError { message } => println!("error: {message}"),
            Notice::MicrophoneChanged { on } => {
                println!("  microphone {}", if on { "on" } else { "off" });
            }
            Notice::CameraChanged { on } => {
                println!("  camera {}", if on { "on" } else { "off" });
            }
            _ => {}
        }
    }
}
