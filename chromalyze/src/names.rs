//! Human readable names for colors, by nearest neighbor in CIELAB

use crate::{
	color::{srgb_to_lab, Pixel},
	kmeans::PaletteEntry,
};
use palette::Lab;
use serde::Serialize;
use std::sync::OnceLock;

/// The reference colors, CSS basic and extended keywords
pub const NAMED_COLORS: [(&str, Pixel); 20] = [
	("black", [0, 0, 0]),
	("white", [255, 255, 255]),
	("red", [255, 0, 0]),
	("lime", [0, 255, 0]),
	("blue", [0, 0, 255]),
	("yellow", [255, 255, 0]),
	("cyan", [0, 255, 255]),
	("magenta", [255, 0, 255]),
	("silver", [192, 192, 192]),
	("gray", [128, 128, 128]),
	("maroon", [128, 0, 0]),
	("olive", [128, 128, 0]),
	("green", [0, 128, 0]),
	("purple", [128, 0, 128]),
	("teal", [0, 128, 128]),
	("navy", [0, 0, 128]),
	("orange", [255, 165, 0]),
	("pink", [255, 192, 203]),
	("brown", [165, 42, 42]),
	("gold", [255, 215, 0]),
];

/// Lab values of [`NAMED_COLORS`], computed on first use
fn reference_labs() -> &'static [Lab; 20] {
	static LABS: OnceLock<[Lab; 20]> = OnceLock::new();
	LABS.get_or_init(|| NAMED_COLORS.map(|(_, rgb)| srgb_to_lab(rgb)))
}

/// Euclidean distance between two Lab colors
fn lab_distance(x: Lab, y: Lab) -> f32 {
	let dl = x.l - y.l;
	let da = x.a - y.a;
	let db = x.b - y.b;
	(dl * dl + da * da + db * db).sqrt()
}

/// The closest reference name to a color
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorName {
	/// Name of the closest reference color
	pub name: &'static str,
	/// Euclidean distance in Lab to that reference color
	pub distance: f32,
}

/// Find the reference color closest to an sRGB color in Lab, the earliest one on ties
#[must_use]
pub fn nearest_name(rgb: Pixel) -> ColorName {
	let lab = srgb_to_lab(rgb);

	let mut best = ColorName { name: NAMED_COLORS[0].0, distance: f32::INFINITY };
	for (&(name, _), &reference) in NAMED_COLORS.iter().zip(reference_labs()) {
		let distance = lab_distance(lab, reference);
		if distance < best.distance {
			best = ColorName { name, distance };
		}
	}

	best
}

/// A palette entry annotated with its nearest color name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedPaletteEntry {
	/// The original entry
	#[serde(flatten)]
	pub entry: PaletteEntry,
	/// Name of the closest reference color
	pub nearest_name: &'static str,
	/// Lab distance to the closest reference color
	pub name_distance: f32,
}

/// Annotate every palette entry with its nearest color name, keeping the palette order
#[must_use]
pub fn assign_names(palette: Vec<PaletteEntry>) -> Vec<NamedPaletteEntry> {
	palette
		.into_iter()
		.map(|entry| {
			let ColorName { name, distance } = nearest_name(entry.rgb);
			NamedPaletteEntry { entry, nearest_name: name, name_distance: distance }
		})
		.collect()
}
