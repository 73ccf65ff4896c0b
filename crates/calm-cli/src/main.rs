use anyhow::{Context, Result};
use calm_core::{TurnRequest, TurnResponse, UserKey};
use calm_orchestrator::{CalmConfig, Collaborators, ConversationOrchestrator};
use calm_storage::{CalmStore, JsonlTurnStore};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calm")]
#[command(about = "Support assistant operator CLI", long_about = None)]
struct Cli {
    /// Directory holding calm.db and the per-user turn logs
    #[arg(long, global = true, default_value = "./data")]
    data_dir: String,
    #[arg(long, global = true)]
    config: Option<String>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the demo therapist directory into an empty store
    Seed,
    /// Run a single turn and print the response as JSON
    Turn {
        #[arg(long, default_value = "default")]
        user: String,
        text: String,
    },
    /// Interactive session on stdin; `exit` or EOF ends it
    Chat {
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// Show recent turns for a user
    History {
        #[arg(long, default_value = "default")]
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List confirmed bookings for a user
    Bookings {
        #[arg(long, default_value = "default")]
        user: String,
    },
    /// Clear a user's turn history and saved session
    Reset {
        #[arg(long, default_value = "default")]
        user: String,
    },
}

struct Workspace {
    store: Arc<CalmStore>,
    memory: Arc<JsonlTurnStore>,
}

impl Workspace {
    fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let store = CalmStore::open(data_dir.join("calm.db")).context("Failed to open calm.db")?;
        let memory = JsonlTurnStore::open(data_dir.join("user_logs"))
            .context("Failed to open turn logs")?;
        Ok(Self {
            store: Arc::new(store),
            memory: Arc::new(memory),
        })
    }

    fn orchestrator(&self, config: CalmConfig) -> ConversationOrchestrator {
        let collaborators = Collaborators::deterministic(self.memory.clone(), self.store.clone())
            .with_sessions(self.store.clone());
        ConversationOrchestrator::new(config, collaborators)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_dir = resolve_path(&cli.data_dir);
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = CalmConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config {}", path.display()),
        None => "Failed to load config".to_string(),
    })?;
    let workspace = Workspace::open(&data_dir)?;

    match cli.command {
        Commands::Seed => {
            let seeded = workspace
                .store
                .seed_demo_directory()
                .context("Failed to seed therapist directory")?;
            if seeded == 0 {
                println!("Therapist directory already populated");
            } else {
                println!("Seeded {seeded} therapists");
            }
        }
        Commands::Turn { user, text } => {
            let orchestrator = workspace.orchestrator(config);
            let response = orchestrator
                .process_turn(request(&user, &text))
                .await
                .context("Turn failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Chat { user } => {
            let orchestrator = workspace.orchestrator(config);
            chat(&orchestrator, &user).await?;
        }
        Commands::History { user, limit } => {
            let key = UserKey::parse(&user)?;
            let records = workspace
                .memory
                .recent(&key, limit)
                .context("Failed to read history")?;
            if records.is_empty() {
                println!("No history for {user}");
            }
            for record in records {
                let emotion = record.emotion.as_deref().unwrap_or("-");
                println!(
                    "[{}] ({emotion}) > {}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.user_input
                );
                println!("  {}", record.agent_output.replace('\n', "\n  "));
            }
        }
        Commands::Bookings { user } => {
            let key = UserKey::parse(&user)?;
            let bookings = workspace
                .store
                .bookings_for_user(key.as_str())
                .context("Failed to read bookings")?;
            if bookings.is_empty() {
                println!("No bookings for {user}");
            }
            for booking in bookings {
                println!(
                    "#{} {} at {} ({}) [{}]",
                    booking.booking_id,
                    booking.therapist_name,
                    booking.starts_at.format(calm_core::SLOT_FORMAT),
                    booking.emotion,
                    booking.status
                );
            }
        }
        Commands::Reset { user } => {
            let orchestrator = workspace.orchestrator(config);
            let response = orchestrator
                .reset_memory(&user)
                .await
                .context("Reset failed")?;
            println!("{}", serde_json::to_string(&response)?);
        }
    }

    Ok(())
}

async fn chat(orchestrator: &ConversationOrchestrator, user: &str) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let text = line.trim();
        if matches!(text, "exit" | "quit") {
            break;
        }
        if !text.is_empty() {
            let response = orchestrator
                .process_turn(request(user, text))
                .await
                .context("Turn failed")?;
            println!("{}", render(&response));
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}

fn request(user: &str, text: &str) -> TurnRequest {
    TurnRequest {
        user_id: Some(user.to_string()),
        user_input: text.to_string(),
    }
}

fn render(response: &TurnResponse) -> String {
    let mut out = response.agent_message.clone();
    let mut tags = Vec::new();
    if let Some(emotion) = &response.emotion {
        tags.push(format!("emotion={emotion}"));
    }
    if let Some(stage) = &response.appointment_stage {
        tags.push(format!("stage={stage}"));
    }
    if let Some(expected) = &response.expected_input {
        tags.push(format!("expects={expected}"));
    }
    tags.push(format!("next={}", response.next_action));
    out.push_str(&format!("\n  [{}]", tags.join(" ")));
    out
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CALM_LOG_LEVEL") {
        level
    } else {
        "warn".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_path(raw: &str) -> PathBuf {
    expand_tilde(raw).unwrap_or_else(|| PathBuf::from(raw))
}

fn expand_tilde(path: &str) -> Option<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        return dirs::home_dir().map(|home| home.join(stripped));
    }
    if path == "~" {
        return dirs::home_dir();
    }
    None
}

/// An explicit path wins; otherwise `./calm.toml`, then the user config dir.
fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(resolve_path(path));
    }
    let mut candidates = vec![PathBuf::from("calm.toml")];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("calm").join("config.toml"));
    }
    candidates.into_iter().find(|path| path.exists())
}
