use anyhow::{Context, Result};
use dataurl::DataUrl;
use lungscan_core::http::{ErrorResponse, PredictionResponse};
use mime_guess::Mime;
use reqwest::{
	multipart::{Form, Part},
	Client,
};
use std::{
	fs,
	path::{Path, PathBuf},
	str::FromStr,
};

pub async fn handle(url: &str, image: &Path, output: Option<PathBuf>) -> Result<()> {
	let bytes = fs::read(image).with_context(|| format!("Couldn't read {}", image.display()))?;
	let mime_type = tree_magic_mini::from_u8(&bytes);

	let file_name = image
		.file_name()
		.map_or_else(|| "upload".to_string(), |name| name.to_string_lossy().to_string());
	let form = Form::new().part(
		"file",
		Part::bytes(bytes).file_name(file_name).mime_str(mime_type)?,
	);

	println!("Running prediction...");
	let response = Client::new()
		.post(format!("{}/predict", url.trim_end_matches('/')))
		.multipart(form)
		.send()
		.await?;

	let status = response.status();
	if !status.is_success() {
		let detail = response
			.json::<ErrorResponse>()
			.await
			.map_or_else(|_| "no details".to_string(), |error| error.detail);

		anyhow::bail!("Prediction failed ({status}): {detail}");
	}

	let prediction = response.json::<PredictionResponse>().await?;
	print_summary(&prediction);

	if let Some(output) = output {
		write_images(&prediction, &output)?;
	}

	Ok(())
}

fn print_summary(prediction: &PredictionResponse) {
	for p in &prediction.predictions {
		println!(
			"{:<14} {:>6.2}%{}",
			p.disease,
			100.0 * p.confidence,
			if p.detected { "  detected" } else { "" }
		);
	}

	match prediction.total_detections {
		0 => println!("No findings detected"),
		1 => println!("1 finding detected"),
		n => println!("{n} findings detected"),
	}
}

fn write_images(prediction: &PredictionResponse, output: &Path) -> Result<()> {
	fs::create_dir_all(output)?;

	let images = std::iter::once(("original", prediction.original_image.as_str())).chain(
		prediction
			.overlay_images
			.iter()
			.map(|overlay| (overlay.disease.as_str(), overlay.image.as_str())),
	);

	for (name, url) in images {
		let dataurl =
			DataUrl::parse(url).map_err(|_| anyhow::anyhow!("Failed to parse data URI for {name}"))?;

		let file_ext = mime_guess::get_mime_extensions(
			&Mime::from_str(dataurl.get_media_type())
				.unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM),
		)
		.and_then(<[&str]>::last)
		.map(|e| format!(".{e}"))
		.unwrap_or_default();

		let path = output.join(format!("{}{file_ext}", name.to_lowercase()));
		fs::write(&path, dataurl.get_data())?;
		println!("Written {name} to {}", path.display());
	}

	Ok(())
}
