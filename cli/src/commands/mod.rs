use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

mod predict;

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Upload an X-ray and print the predicted findings
	Predict {
		/// Path to the image to classify
		image: PathBuf,

		/// Directory to write the original image and one overlay per detected finding into
		#[clap(short, long)]
		output: Option<PathBuf>,
	},
}

pub async fn exec(url: &str, command: Command) -> Result<()> {
	match command {
		Command::Predict { image, output } => predict::handle(url, &image, output).await,
	}
}
