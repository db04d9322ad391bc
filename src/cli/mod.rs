mod download;
mod inspect;
mod publish;
mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::core::cancel::CancelToken;
use crate::core::config::{self, Config};
use crate::core::error::CloneError;
use crate::core::store::TaskStore;
use crate::core::telegram::TelegramClient;
use crate::core::telegram::session::SessionClient;

fn print_help() {
    println!();
    println!(
        " {} — clone, download and publish Telegram content",
        style("clonechat").green().bold()
    );
    println!();
    println!(" {}", style("Cloning").bold());
    println!("   sync           Clone a chat into a destination channel (resumable)");
    println!();
    println!(" {}", style("Media").bold());
    println!("   download       Fetch every video of a chat and extract audio");
    println!("   publish        Publish a local folder as a structured channel");
    println!();
    println!(" {}", style("Inspection").bold());
    println!("   list-chats     List every chat this account can access");
    println!("   list-topics    List the topics of a forum group (--id)");
    println!("   test-resolve   Resolve an identifier without cloning (--id)");
    println!();
    println!(" {}", style("Maintenance").bold());
    println!("   init-database  Create or migrate the task store");
    println!("   version        Print the version");
    println!();
    println!(
        " {} {} <command> [flags]",
        style("Usage:").bold(),
        style("clonechat").green()
    );
    println!();
}

pub(crate) fn print_error(msg: &str) {
    eprintln!("{}", style(msg).red().bold());
}

pub(crate) fn print_success(msg: &str) {
    println!("{}", style(msg).green());
}

/// Everything a platform-facing command needs, wired once.
pub(crate) struct App {
    pub config: Config,
    pub store: Arc<TaskStore>,
    pub client: Arc<dyn TelegramClient>,
    pub cancel: CancelToken,
}

pub(crate) async fn connect_app() -> Result<App> {
    let config = config::load_config()?;
    let store = Arc::new(TaskStore::open(&config.database_path())?);
    let cancel = CancelToken::new();
    cancel.listen_for_ctrl_c();
    let client: Arc<dyn TelegramClient> = Arc::new(SessionClient::connect(&config).await?);
    Ok(App {
        config,
        store,
        client,
        cancel,
    })
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CloneError>()
        .map(CloneError::exit_code)
        .unwrap_or(1)
}

pub async fn run_main() -> i32 {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "version" => {
            println!("clonechat v{}", env!("CARGO_PKG_VERSION"));
            return 0;
        }
        "help" | "--help" | "-h" => {
            print_help();
            return 0;
        }
        _ => {}
    }

    if let Err(err) = crate::logging::init(Path::new("data/app.log")) {
        eprintln!("could not initialize logging: {err:#}");
    }

    let result = match command {
        "sync" => sync::run(&args).await,
        "download" => download::run(&args).await,
        "publish" => publish::run(&args).await,
        "list-chats" => inspect::list_chats().await,
        "list-topics" => inspect::list_topics(&args).await,
        "test-resolve" => inspect::test_resolve(&args).await,
        "init-database" => init_database().await,
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
            return 1;
        }
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            print_error(&format!("{err:#}"));
            exit_code_for(&err)
        }
    }
}

async fn init_database() -> Result<()> {
    let store = TaskStore::open(Path::new("data/clonechat.db"))?;
    store.ensure_schema().await?;
    print_success("Task store ready: data/clonechat.db");
    Ok(())
}

/// Shared flag-walker: returns the value following the first flag whose
/// name matches.
pub(crate) fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

pub(crate) fn has_flag(args: &[String], start: usize, names: &[&str]) -> bool {
    args[start.min(args.len())..]
        .iter()
        .any(|arg| names.contains(&arg.as_str()))
}
