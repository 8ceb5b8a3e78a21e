use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use snaptrail_engine::cli::{
    self, ControlConsole, FileErrorMode, FileOptions, OutputHandlers, ReplOptions,
};
use snaptrail_engine::config::ConfigLoader;
use snaptrail_engine::coordinator::Coordinator;
use snaptrail_engine::protocol::Request;
use snaptrail_engine::storage::{FileStore, MemoryStore, StateStore, Storage, default_state_path};
use snaptrail_r::host::RemoteHost;
use snaptrail_r::server::RecorderServer;

mod inspect;

#[derive(Parser)]
#[command(name = "snaptrail", version, about = "SnapTrail session recorder")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the recorder bridge and its control console
    Serve {
        /// WebSocket port the browser shims connect to
        #[arg(long, default_value_t = 9501)]
        port: u16,

        /// Config file (default: ./snaptrail.yaml, then ~/.snaptrail/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// State file backing session persistence (default: ~/.snaptrail/state.json)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Artifact folder under the browser's download root
        #[arg(long)]
        root: Option<String>,

        /// Idle milliseconds before an active session auto-ends
        #[arg(long)]
        idle_ms: Option<u64>,

        /// Route artifacts under the test subfolder
        #[arg(long)]
        test_mode: bool,

        /// Console script to run instead of the interactive console
        #[arg(long)]
        file: Option<String>,
    },
    /// Summarize a session export document
    Inspect {
        /// Path to a `*_session.json` export
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging goes to stderr so the console keeps stdout to itself.
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.mode {
        Mode::Serve {
            port,
            config,
            state,
            root,
            idle_ms,
            test_mode,
            file,
        } => serve(port, config, state, root, idle_ms, test_mode, file).await,
        Mode::Inspect { path } => inspect::run(&path),
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    port: u16,
    config_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
    root: Option<String>,
    idle_ms: Option<u64>,
    test_mode: bool,
    file: Option<String>,
) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load_default()?,
    };
    if let Some(root) = root {
        config.root_folder = root;
    }
    if let Some(idle_ms) = idle_ms {
        config.idle_timeout_ms = idle_ms;
    }
    if test_mode {
        config.test_capture_mode = true;
    }
    info!(
        root = %config.root_folder,
        idle_ms = config.idle_timeout_ms,
        test = config.test_capture_mode,
        "recorder configuration loaded"
    );

    let store: Arc<dyn StateStore> = match state_path.or_else(default_state_path) {
        Some(path) => Arc::new(FileStore::open(&path).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let host = RemoteHost::new();
    let coordinator = Coordinator::new(Arc::new(host.clone()), Storage::new(store), config);
    coordinator.hydrate().await?;

    let server = RecorderServer::new(port);
    let handle = server.start(coordinator.clone(), host).await?;

    let console = ControlConsole::new(coordinator.clone());
    let output = OutputHandlers {
        out: |msg| println!("{}", msg),
        err: |msg| println!("{}", msg),
    };

    let console_result = if let Some(path) = file {
        cli::run_file(
            &console,
            output,
            &path,
            FileOptions {
                stop_on_error: true,
                error_mode: FileErrorMode::WithLine,
            },
        )
        .await
    } else {
        let banner = format!("Recorder bridge on ws://localhost:{}", port);
        let repl_options = ReplOptions {
            banner_lines: &[
                banner.as_str(),
                "Recording starts with 'toggle'; 'help' lists the commands.",
                "Type 'exit' or 'quit' to close.",
            ],
            prompt: "> ",
            exit_commands: &["exit", "quit"],
            handle_ctrl_c: true,
            ctrl_c_message: Some("Interrupted; closing the recorder."),
        };
        cli::run_repl(&console, output, repl_options).await
    };

    // A session still running at exit is ended so its export gets written.
    if coordinator.status().await.session_active {
        let _ = coordinator.handle(Request::ToggleSession).await;
    }
    handle.shutdown();

    console_result.map_err(|err| anyhow::anyhow!("{}", err))
}
