#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Result;
use clap::Parser;

mod commands;

#[derive(Parser)]
#[clap(version, about = "Classify chest X-rays against a running lungscan server")]
struct Cli {
	/// Base URL of the lungscan server
	#[clap(long, global = true, default_value = "http://localhost:8000")]
	url: String,

	#[clap(subcommand)]
	command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	commands::exec(&cli.url, cli.command).await
}
