mod cli;
mod core;
mod logging;

#[tokio::main]
async fn main() {
    let code = cli::run_main().await;
    std::process::exit(code);
}
