use clap::Parser;

#[tokio::main]
async fn main() {
    if let Err(err) = keysub_cli::run(keysub_cli::args::Cli::parse()).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
