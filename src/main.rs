use std::path::PathBuf;

use clap::Parser;
use tokio::time::Duration;

use schedrelay::store::ProjectConfig;
use schedrelay::{IdentityStore, RelayServer, ServerConfig};

/// Collaboration relay for shared task and resource schedules.
#[derive(Debug, Parser)]
#[command(name = "schedrelay", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on; the next free port is used when taken.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Seconds of inactivity before all projects reset. 0 disables.
    #[arg(long, default_value_t = 1800)]
    reset_delay: u64,

    /// Minutes between version autosaves.
    #[arg(long, default_value_t = 10)]
    autosave_interval_mins: u64,

    /// Directory holding the project dataset files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Log every frame sent and received.
    #[arg(long)]
    debug: bool,
}

fn default_projects(data_dir: &std::path::Path) -> Vec<ProjectConfig> {
    vec![
        ProjectConfig::file(1, "SaaS", data_dir.join("saas.json")),
        ProjectConfig::file(2, "Website", data_dir.join("website.json")),
        ProjectConfig::file(3, "Backend", data_dir.join("backend.json")),
    ]
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        reset_delay: (args.reset_delay > 0).then(|| Duration::from_secs(args.reset_delay)),
        auto_save_interval: Duration::from_secs(args.autosave_interval_mins * 60),
        projects: default_projects(&args.data_dir),
        identity: IdentityStore::default(),
    };

    let server = match RelayServer::new(config) {
        Ok(server) => server,
        Err(err) => {
            log::error!("Failed to start: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = server.run().await {
        log::error!("Server terminated: {err}");
        std::process::exit(1);
    }
}
