use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use quizroom_engine::{
    demo_quiz, start_reaper, GameConfig, QuizCatalog, RegistryConfig, SessionOrchestrator,
    SessionRegistry,
};
use quizroom_server::{HandlerState, ServerConfig};
use quizroom_store::{
    Database, MemoryQuizStore, MemoryUserDirectory, QuizRepo, QuizStore, UserDirectory, UserRepo,
};
use quizroom_telemetry::TelemetryConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Live multi-participant quiz server")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, env = "QUIZROOM_PORT", default_value_t = 3000)]
    port: u16,

    /// SQLite database file. Defaults to ~/.quizroom/quizroom.db.
    #[arg(long, env = "QUIZROOM_DB")]
    db_path: Option<PathBuf>,

    /// Keep quizzes and accounts in memory only.
    #[arg(long)]
    in_memory: bool,

    #[arg(long, env = "QUIZROOM_LOG", default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    #[arg(long, default_value_t = quizroom_engine::session::DEFAULT_MAX_PARTICIPANTS)]
    max_participants: usize,

    #[arg(long, default_value_t = quizroom_engine::session::DEFAULT_POINTS_PER_CORRECT)]
    points_per_correct: u32,

    /// Destroy games with no activity for this many seconds.
    #[arg(long, default_value_t = 30 * 60)]
    idle_timeout_secs: u64,

    /// Destroy games whose host has been gone this many seconds.
    #[arg(long, default_value_t = 60)]
    host_grace_secs: u64,

    /// Outbound frames buffered per connection before it is dropped.
    #[arg(long, default_value_t = 256)]
    send_queue: usize,

    /// Skip seeding the demo quiz.
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = quizroom_telemetry::parse_level(&args.log_level)
        .with_context(|| format!("unknown log level {:?}", args.log_level))?;
    quizroom_telemetry::init_telemetry(&TelemetryConfig {
        log_level,
        json: args.log_json,
        ..Default::default()
    });

    tracing::info!("Starting quizroom server");

    let (quizzes, users): (Arc<dyn QuizStore>, Arc<dyn UserDirectory>) = if args.in_memory {
        (
            Arc::new(MemoryQuizStore::new()),
            Arc::new(MemoryUserDirectory::new()),
        )
    } else {
        let db_path = args
            .db_path
            .clone()
            .unwrap_or_else(|| dirs_home().join(".quizroom").join("quizroom.db"));
        let db = Database::open(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        (
            Arc::new(QuizRepo::new(db.clone())),
            Arc::new(UserRepo::new(db)),
        )
    };

    let catalog = Arc::new(QuizCatalog::new(quizzes));
    let demo = demo_quiz();
    if !args.no_seed && !catalog.contains(&demo.id).context("checking for demo quiz")? {
        catalog.insert(demo).context("seeding demo quiz")?;
        tracing::info!("Seeded demo quiz");
    }

    let registry = Arc::new(SessionRegistry::new(RegistryConfig {
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        host_grace: Duration::from_secs(args.host_grace_secs),
        game: GameConfig {
            max_participants: args.max_participants,
            points_per_correct: args.points_per_correct,
        },
        ..Default::default()
    }));
    let _reaper = start_reaper(Arc::clone(&registry));

    let orchestrator = Arc::new(SessionOrchestrator::new(Arc::clone(&catalog), registry));
    let handler_state = Arc::new(HandlerState::new(orchestrator, catalog, users));

    let config = ServerConfig {
        port: args.port,
        max_send_queue: args.send_queue,
        ..Default::default()
    };
    let handle = quizroom_server::start(config, handler_state)
        .await
        .context("starting server")?;

    tracing::info!(port = handle.port, "Quizroom server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("Shutting down");
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
