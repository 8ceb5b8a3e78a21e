use std::sync::Arc;

use clap::Parser as ClapParser;
use snaptrail_engine::config::ConfigLoader;
use snaptrail_engine::coordinator::Coordinator;
use snaptrail_engine::storage::{FileStore, MemoryStore, StateStore, Storage, default_state_path};
use snaptrail_r::host::RemoteHost;
use snaptrail_r::server::RecorderServer;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 9501)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    println!("Starting SnapTrail recorder bridge on port {}...", args.port);
    println!(
        "Connect the browser shims to ws://localhost:{}",
        args.port
    );

    let config = ConfigLoader::load_default()?;
    let store: Arc<dyn StateStore> = match default_state_path() {
        Some(path) => Arc::new(FileStore::open(&path).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let host = RemoteHost::new();
    let coordinator = Coordinator::new(Arc::new(host.clone()), Storage::new(store), config);
    coordinator.hydrate().await?;

    let server = RecorderServer::new(args.port);
    let handle = server.start(coordinator, host).await?;
    println!("Bridge ready on {}. Ctrl-C to stop.", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    Ok(())
}
