use std::collections::HashSet;

/// Confidence above which a finding counts as present.
pub const DETECTION_THRESHOLD: f32 = 0.5;

/// A finding the classifier can report, with the color used to draw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
	pub name: &'static str,
	pub color: (u8, u8, u8),
}

impl Label {
	const fn new(name: &'static str, color: (u8, u8, u8)) -> Self {
		Self { name, color }
	}

	/// The color as a CSS `rgb()` string.
	#[must_use]
	pub fn css_color(&self) -> String {
		let (r, g, b) = self.color;

		format!("rgb({r}, {g}, {b})")
	}
}

/// The label set. Index `i` of every confidence vector refers to `LABELS[i]`.
pub const LABELS: [Label; 5] = [
	Label::new("Normal", (0, 200, 83)),
	Label::new("COVID", (255, 69, 96)),
	Label::new("TB", (72, 133, 237)),
	Label::new("Pneumonia", (255, 193, 7)),
	Label::new("Lung_Opacity", (142, 36, 170)),
];

#[must_use]
pub fn is_detected(confidence: f32) -> bool {
	confidence > DETECTION_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
	#[error("Label table is empty")]
	Empty,

	#[error("Label {0} appears more than once")]
	DuplicateName(&'static str),

	#[error("Labels {0} and {1} share the same color")]
	DuplicateColor(&'static str, &'static str),
}

/// Check that a label table can be used as a color key: every name and every color must be unique.
///
/// # Errors
///
/// Returns an error naming the first offending label.
pub fn validate_labels(labels: &[Label]) -> Result<(), LabelError> {
	if labels.is_empty() {
		return Err(LabelError::Empty);
	}

	let mut names = HashSet::new();
	for label in labels {
		if !names.insert(label.name) {
			return Err(LabelError::DuplicateName(label.name));
		}
	}

	for (i, label) in labels.iter().enumerate() {
		if let Some(other) = labels[..i].iter().find(|other| other.color == label.color) {
			return Err(LabelError::DuplicateColor(other.name, label.name));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_labels_are_valid() {
		assert_eq!(validate_labels(&LABELS), Ok(()));
		assert_eq!(LABELS.len(), 5);
		assert_eq!(LABELS[0].name, "Normal");
		assert_eq!(LABELS[4].name, "Lung_Opacity");
	}

	#[test]
	fn duplicate_entries_are_rejected() {
		let labels = [LABELS[0], LABELS[1], LABELS[0]];
		assert_eq!(
			validate_labels(&labels),
			Err(LabelError::DuplicateName("Normal"))
		);

		let labels = [LABELS[0], Label::new("Other", LABELS[0].color)];
		assert_eq!(
			validate_labels(&labels),
			Err(LabelError::DuplicateColor("Normal", "Other"))
		);

		assert_eq!(validate_labels(&[]), Err(LabelError::Empty));
	}

	#[test]
	fn detection_threshold_is_strict() {
		assert!(is_detected(0.92));
		assert!(is_detected(0.500_001));
		assert!(!is_detected(0.5));
		assert!(!is_detected(0.1));
	}

	#[test]
	fn css_color_is_formatted() {
		assert_eq!(LABELS[0].css_color(), "rgb(0, 200, 83)");
		assert_eq!(LABELS[2].css_color(), "rgb(72, 133, 237)");
	}
}
