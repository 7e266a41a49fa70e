use clap::{Parser, Subcommand};
use lib::backend::{BackendClient, QueryBackend};
use lib::controller::{SendError, SessionController};
use lib::store::SessionStore;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docent")]
#[command(about = "Docent CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: DOCENT_CONFIG_PATH or ~/.docent/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Chat with the retrieval backend (interactive).
    Chat {
        /// Config file path (default: DOCENT_CONFIG_PATH or ~/.docent/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Optional existing session id to continue.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// List stored sessions.
    Sessions {
        /// Config file path (default: DOCENT_CONFIG_PATH or ~/.docent/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Clear a session's messages (and its backend history when it has one).
    Clear {
        /// Config file path (default: DOCENT_CONFIG_PATH or ~/.docent/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Session id to clear.
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Ask the backend to re-index its document corpus.
    Reload {
        /// Config file path (default: DOCENT_CONFIG_PATH or ~/.docent/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("docent {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, session }) => {
            if let Err(e) = run_chat(config, session).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sessions { config }) => {
            if let Err(e) = run_sessions(config) {
                log::error!("sessions failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Clear { config, id }) => {
            if let Err(e) = run_clear(config, id).await {
                log::error!("clear failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Reload { config }) => {
            if let Err(e) = run_reload(config).await {
                log::error!("reload failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Build the controller from config: store next to the config file, backend
/// client from the resolved base URL.
fn build_controller(
    config_path: Option<std::path::PathBuf>,
) -> anyhow::Result<Arc<SessionController>> {
    let (config, path) = lib::config::load_config(config_path)?;
    let backend = Arc::new(BackendClient::new(Some(lib::config::resolve_backend_url(
        &config,
    ))));
    let store = SessionStore::new(lib::config::resolve_sessions_path(&config, &path));
    Ok(Arc::new(SessionController::new(backend, store)))
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    session: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let controller = build_controller(config_path)?;
    controller.start().await;
    if let Some(id) = session {
        if !controller.select_session(&id).await {
            anyhow::bail!("unknown session: {}", id);
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/new") {
            let session = controller.create_session().await;
            println!("started {} ({})", session.title, session.id());
            continue;
        }
        if input.eq_ignore_ascii_case("/clear") {
            let Some(id) = controller.current_session_id().await else {
                continue;
            };
            match controller.clear_session(&id).await {
                Ok(()) => println!("cleared {}", id),
                Err(e) => eprintln!("clear failed: {}", e),
            }
            continue;
        }

        match controller.send_message(input).await {
            Ok(reply) => {
                println!("< {}", reply.content.trim());
                for (i, source) in reply.sources.iter().flatten().enumerate() {
                    println!(
                        "  [{}] {} (Article {}) ({}% match)",
                        i + 1,
                        source.title,
                        source.article_number,
                        (source.relevance_score * 100.0).round() as i32
                    );
                }
            }
            Err(e @ SendError::Busy) => eprintln!("{}", e),
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    controller.shutdown().await;
    Ok(())
}

fn run_sessions(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    let store = SessionStore::new(lib::config::resolve_sessions_path(&config, &path));
    let sessions = store.load_all();
    if sessions.is_empty() {
        println!("no stored sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {}  {} messages",
            session.id(),
            session.title,
            session.messages.len()
        );
    }
    Ok(())
}

async fn run_clear(config_path: Option<std::path::PathBuf>, id: String) -> anyhow::Result<()> {
    let controller = build_controller(config_path)?;
    controller.start().await;
    controller.clear_session(&id).await?;
    println!("cleared {}", id);
    Ok(())
}

async fn run_reload(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let backend = BackendClient::new(Some(lib::config::resolve_backend_url(&config)));
    backend.reload_documents().await?;
    println!("documents reloaded");
    Ok(())
}
