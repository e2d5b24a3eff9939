use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
	contours::{find_contours, BorderType, Contour},
	drawing::{draw_line_segment_mut, draw_polygon_mut},
	point::Point,
};

use crate::explain::SaliencyMap;

/// Saliency above which a pixel belongs to a highlighted region.
pub const CAM_THRESHOLD: f32 = 0.6;

/// Weight of the fill color when blended over the grayscale image.
pub const ALPHA: f32 = 0.5;

const OUTLINE: Rgb<u8> = Rgb([255, 255, 255]);

/// Highlight the regions of `gray` where `saliency` is above the threshold.
///
/// Each region's outer contour is filled with `color` and blended over the image, then outlined in white.
/// Pixels outside every contour are left untouched. `saliency` must have the same dimensions as `gray`.
#[must_use]
pub fn render_overlay(gray: &RgbImage, saliency: &SaliencyMap, color: (u8, u8, u8)) -> RgbImage {
	debug_assert_eq!(gray.dimensions(), saliency.dimensions());

	let contours = external_contours(&binarize(saliency));
	tracing::debug!("Found {} highlighted regions", contours.len());

	let (r, g, b) = color;
	let mut fill = RgbImage::new(gray.width(), gray.height());
	for contour in &contours {
		fill_contour(&mut fill, &contour.points, Rgb([r, g, b]));
	}

	let mut blended = gray.clone();
	for (out, fill) in blended.pixels_mut().zip(fill.pixels()) {
		for (channel, &fill) in out.0.iter_mut().zip(fill.0.iter()) {
			if fill > 0 {
				*channel = blend(*channel, fill);
			}
		}
	}

	for contour in &contours {
		outline_contour(&mut blended, &contour.points, OUTLINE);
	}

	blended
}

fn binarize(saliency: &SaliencyMap) -> GrayImage {
	GrayImage::from_fn(saliency.width(), saliency.height(), |x, y| {
		Luma([if saliency.get_pixel(x, y)[0] > CAM_THRESHOLD { 255 } else { 0 }])
	})
}

/// Outer borders that aren't nested inside another region.
///
/// The mask is traced inside a one pixel background frame, so regions touching the image edge still get an outer border.
fn external_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
	let (width, height) = mask.dimensions();
	if width == 0 || height == 0 {
		return Vec::new();
	}

	let mut framed = GrayImage::new(width + 2, height + 2);
	image::imageops::replace(&mut framed, mask, 1, 1);

	let max_x = i32::try_from(width).unwrap_or(i32::MAX) - 1;
	let max_y = i32::try_from(height).unwrap_or(i32::MAX) - 1;

	find_contours::<i32>(&framed)
		.into_iter()
		.filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
		.filter(|contour| !contour.points.is_empty())
		.map(|mut contour| {
			for point in &mut contour.points {
				point.x = (point.x - 1).clamp(0, max_x);
				point.y = (point.y - 1).clamp(0, max_y);
			}
			contour
		})
		.collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(base: u8, fill: u8) -> u8 {
	f32::from(base)
		.mul_add(1.0 - ALPHA, f32::from(fill) * ALPHA)
		.round()
		.clamp(0.0, 255.0) as u8
}

fn fill_contour(canvas: &mut RgbImage, points: &[Point<i32>], color: Rgb<u8>) {
	let mut polygon = points.to_vec();
	polygon.dedup();
	while polygon.len() > 1 && polygon.first() == polygon.last() {
		polygon.pop();
	}

	if polygon.len() < 3 {
		outline_contour(canvas, &polygon, color);
		return;
	}

	draw_polygon_mut(canvas, &polygon, color);
}

#[allow(clippy::cast_precision_loss)]
fn outline_contour(canvas: &mut RgbImage, points: &[Point<i32>], color: Rgb<u8>) {
	let Some(first) = points.first() else {
		return;
	};

	if points.len() == 1 {
		if let (Ok(x), Ok(y)) = (u32::try_from(first.x), u32::try_from(first.y)) {
			if x < canvas.width() && y < canvas.height() {
				canvas.put_pixel(x, y, color);
			}
		}
		return;
	}

	for (start, end) in points.iter().zip(points.iter().skip(1).chain([first])) {
		draw_line_segment_mut(
			canvas,
			(start.x as f32, start.y as f32),
			(end.x as f32, end.y as f32),
			color,
		);
	}
}
