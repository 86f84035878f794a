use clap::Parser;
use tenantchat::commands::{self, Cli};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = commands::run(cli).await {
        log::error!("{:?}", err);
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
