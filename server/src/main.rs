use clap::Parser;
use log::{error, info};
use server::{Backend, FileBackend, Interaction, Server, Store};
use std::path::PathBuf;
use std::sync::Arc;

/// Workforce collection server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Path to the JSON data file holding users and the collection
    #[clap(short, long, default_value = "workforce.json")]
    data_file: PathBuf,
    /// Optional CSV mirror written on every flush
    #[clap(long)]
    csv_mirror: Option<PathBuf>,
    /// Upper bound of the identifier space
    #[clap(long, default_value_t = u64::MAX)]
    capacity: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    // Startup failures are fatal: exit nonzero before accepting traffic.
    if let Err(e) = run(args).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> server::Result<()> {
    let backend: Arc<dyn Backend> =
        Arc::new(FileBackend::new(args.data_file, args.csv_mirror));
    backend.create_schema()?;

    let users = backend.load_users()?;
    info!("user directory loaded ({} users)", users.len());

    let interaction = Interaction::new(Store::new(args.capacity));
    let records = backend.load_collection()?;
    interaction.bulk_load(records).await;
    info!("collection loaded ({} workers)", interaction.size().await);

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, interaction, backend).await?;
    server.run().await
}
