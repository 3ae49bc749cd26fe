use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Mirror every completed backup into this directory
    #[arg(long, value_name = "DIR")]
    pub mirror_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub engine_config: PathBuf,
    /// Falls back to the engine config's `[log] level` when unset
    pub log_level: Option<String>,
    pub mirror_dir: Option<PathBuf>,
    pub mirror_keep: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            engine_config: PathBuf::from(
                std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "backup.toml".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").ok(),
            mirror_dir: std::env::var("MIRROR_DIR").ok().map(PathBuf::from),
            mirror_keep: std::env::var("MIRROR_KEEP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Command-line flags win over the environment.
    pub fn with_args(mut self, args: Args) -> Self {
        if let Some(config) = args.config {
            self.engine_config = config;
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if args.log_level.is_some() {
            self.log_level = args.log_level;
        }
        if args.mirror_dir.is_some() {
            self.mirror_dir = args.mirror_dir;
        }
        self
    }
}
