mod app;
mod backend;
mod cache;
mod commands;
mod config;
mod error;
mod event;
mod logging;
mod partner;
mod render;
mod session;
mod tasks;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(about = "A shared task list for two, synced with a PocketBase backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/duet/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
  /// Sign in (password from DUET_PASSWORD or prompted)
  Login {
    #[arg(short, long)]
    email: Option<String>,
  },
  /// Create an account and sign in
  Register {
    #[arg(short, long)]
    email: Option<String>,
  },
  /// Forget the stored session
  Logout,
  /// Show the signed-in account
  Whoami,
  /// Show your tasks
  #[command(alias = "ls")]
  List,
  /// Add a task
  Add {
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
  },
  /// Change the description of task <n>
  Edit {
    n: usize,
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
  },
  /// Flip task <n> between open and done
  #[command(alias = "done")]
  Toggle { n: usize },
  /// Delete task <n>
  #[command(alias = "remove")]
  Rm { n: usize },
  /// Show your partner's tasks
  Partner,
  /// Interactive shell (default)
  Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let mut app = app::App::new(config)?;
  match args.command.unwrap_or(Action::Shell) {
    Action::Login { email } => app.login(email).await?,
    Action::Register { email } => app.register(email).await?,
    Action::Logout => app.logout()?,
    Action::Whoami => app.whoami().await?,
    Action::List => app.list().await?,
    Action::Add { text } => app.add(&text.join(" ")).await?,
    Action::Edit { n, text } => app.edit(n, &text.join(" ")).await?,
    Action::Toggle { n } => app.toggle(n).await?,
    Action::Rm { n } => app.remove(n).await?,
    Action::Partner => app.show_partner().await?,
    Action::Shell => app.shell().await?,
  }

  Ok(())
}
