mod activity;
mod api;
mod cli;
mod config;
mod models;
mod session;
mod store;
mod transport;
mod watch;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "txdash",
    about = "Terminal dashboard for a TranspareX fund-disbursement backend"
)]
pub struct Args {
    #[arg(short = 'c', long, help = "Run a single command and exit")]
    pub command: Option<String>,

    #[arg(long, env = "TXDASH_API_URL", help = "Backend API base URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "TXDASH_SESSION_FILE", help = "Session file path")]
    pub session_file: Option<PathBuf>,

    #[arg(long, help = "Keep the session in memory only (no session file)")]
    pub no_persist: bool,

    #[arg(
        long,
        value_name = "SECS",
        help = "Blockchain event poll interval in seconds"
    )]
    pub poll_interval: Option<u64>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Disable the activity log")]
    pub no_activity: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load().unwrap_or_default()
    };

    // CLI and env overrides take priority over file config
    if let Some(url) = &args.api_url {
        cfg.api.base_url = url.clone();
    }
    if let Some(secs) = args.poll_interval {
        cfg.watch.poll_interval_secs = secs;
    }
    if let Some(path) = &args.session_file {
        cfg.storage.session_file = Some(path.clone());
    }
    if args.no_activity {
        cfg.activity.enabled = false;
    }

    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        return Err(anyhow::anyhow!("invalid configuration"));
    }

    let store: Box<dyn store::SessionStore> = if args.no_persist {
        Box::new(store::MemoryStore::new())
    } else {
        match cfg.session_file() {
            Some(path) => Box::new(store::FileStore::open(&path)?),
            None => Box::new(store::MemoryStore::new()),
        }
    };

    let session = session::SessionManager::new(store, Box::new(session::SystemClock));
    let client = api::ApiClient::new(
        &cfg.api.base_url,
        Box::new(transport::UreqTransport::new()),
        session,
    );

    let session_id = uuid::Uuid::new_v4().to_string();
    let activity = if cfg.activity.enabled {
        match cfg.activity_dir() {
            Some(dir) => {
                let path = dir.join(format!("{}.jsonl", session_id));
                Some(activity::ActivityLog::new(&path, &session_id)?)
            }
            None => None,
        }
    } else {
        None
    };

    let ctx = cli::Context {
        args,
        config: cfg,
        client: RefCell::new(client),
        activity: RefCell::new(activity),
        session_id,
    };

    if let Some(command) = &ctx.args.command {
        cli::run_once(&ctx, command)
    } else {
        cli::run_repl(ctx)
    }
}
