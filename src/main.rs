use clap::Parser;
use color_eyre::Result;
use courier::{app::App, commands::Command, config, logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Browse menus, manage a cart, place and track food-delivery orders")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/courier/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Restaurant to use when a command doesn't name one
  #[arg(short, long)]
  restaurant: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override restaurant if specified on command line
  let config = if let Some(restaurant) = args.restaurant {
    config::Config {
      default_restaurant: Some(restaurant),
      ..config
    }
  } else {
    config
  };

  // Held until exit so buffered log lines are flushed
  let _log_guard = logging::init(&config.logging)?;

  let app = App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
