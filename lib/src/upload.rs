use std::{
	env::temp_dir,
	path::{Path, PathBuf},
};

use anyhow::Result;
use uuid::Uuid;

/// An uploaded file, stored in the temporary directory for as long as this value lives.
#[derive(Debug)]
pub struct TempUpload {
	path: PathBuf,
	mime_type: &'static str,
}

impl TempUpload {
	/// Persist `bytes` to a uniquely named temporary file, named after their sniffed type.
	///
	/// # Errors
	///
	/// Returns an error if the file can't be written.
	pub fn new(bytes: &[u8]) -> Result<Self> {
		let mime_type = tree_magic_mini::from_u8(bytes);
		let file_ext = mime_guess::get_mime_extensions_str(mime_type)
			.and_then(<[&str]>::last)
			.unwrap_or(&"bin");

		let path = temp_dir().join(format!("{}.{file_ext}", Uuid::new_v4()));
		std::fs::write(&path, bytes)?;
		tracing::debug!("Stored {mime_type} upload at {}", path.display());

		Ok(Self { path, mime_type })
	}

	/// The media type sniffed from the file's contents.
	pub const fn mime_type(&self) -> &'static str {
		self.mime_type
	}

	pub fn is_image(&self) -> bool {
		self.mime_type.starts_with("image/")
	}
}

impl AsRef<Path> for TempUpload {
	fn as_ref(&self) -> &Path {
		self.path.as_ref()
	}
}

impl Drop for TempUpload {
	fn drop(&mut self) {
		tracing::debug!("Removing temporary file at path {:?}", self.path);

		if let Err(e) = std::fs::remove_file(&self.path) {
			tracing::warn!("Failed to remove temporary file {:?}: {e}", self.path);
		}
	}
}
