//! Network-free analysis: orientation, dominant color and edge complexity.

use image::{DynamicImage, GenericImageView, GrayImage};
use serde::Serialize;
use std::path::Path;

use super::colors::{extract_dominant_colors, parse_hex, DEFAULT_PALETTE_SIZE};
use super::{open_image, Annotation, ScoredTag, StageKind};
use crate::error::AnnotationError;

const ORIENTATION_CONFIDENCE: f32 = 0.9;
const COLOR_CONFIDENCE: f32 = 0.7;
const COMPLEXITY_CONFIDENCE: f32 = 0.6;

/// Aspect ratios above this are landscape, below `PORTRAIT_MAX_RATIO` portrait.
const LANDSCAPE_MIN_RATIO: f32 = 1.5;
const PORTRAIT_MAX_RATIO: f32 = 0.7;

/// Edge density above which a photo is tagged "complex".
const COMPLEXITY_THRESHOLD: f32 = 0.1;
/// Sobel gradient magnitude (0-255 luma scale) that counts as an edge.
const EDGE_MAGNITUDE_THRESHOLD: f32 = 100.0;
/// Edge detection and histograms run on a copy no larger than this.
const ANALYSIS_EDGE: u32 = 1024;
const HISTOGRAM_BINS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let ratio = width as f32 / height.max(1) as f32;
        if ratio > LANDSCAPE_MIN_RATIO {
            Orientation::Landscape
        } else if ratio < PORTRAIT_MAX_RATIO {
            Orientation::Portrait
        } else {
            Orientation::Square
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
            Orientation::Square => "square",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Orientation::Landscape => "Landscape",
            Orientation::Portrait => "Portrait",
            Orientation::Square => "Square",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorHistogram {
    pub r: Vec<f32>,
    pub g: Vec<f32>,
    pub b: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFeatures {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f32,
    pub edge_density: f32,
    pub color_histogram: ColorHistogram,
}

/// The local analysis stage. Stateless; never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAnalyzer;

impl LocalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, image_path: &Path) -> Result<Annotation, AnnotationError> {
        let img = open_image(image_path)?;
        Ok(self.analyze_image(&img))
    }

    pub fn analyze_image(&self, img: &DynamicImage) -> Annotation {
        let (width, height) = img.dimensions();
        let orientation = Orientation::from_dimensions(width, height);

        let dominant = extract_dominant_colors(img, 3).into_iter().next();
        let colors = extract_dominant_colors(img, DEFAULT_PALETTE_SIZE);

        let working = if width.max(height) > ANALYSIS_EDGE {
            img.thumbnail(ANALYSIS_EDGE, ANALYSIS_EDGE)
        } else {
            img.clone()
        };
        let edge_density = edge_density(&working.to_luma8());
        let color_histogram = color_histogram(&working);

        let mut tags = vec![ScoredTag::new(
            orientation.as_str(),
            ORIENTATION_CONFIDENCE,
            StageKind::Local,
        )];
        if let Some(hex) = &dominant {
            tags.push(ScoredTag::new(color_name(hex), COLOR_CONFIDENCE, StageKind::Local));
        }
        let complexity = if edge_density > COMPLEXITY_THRESHOLD {
            "complex"
        } else {
            "simple"
        };
        tags.push(ScoredTag::new(complexity, COMPLEXITY_CONFIDENCE, StageKind::Local));

        let caption = match &dominant {
            Some(hex) => format!(
                "{} photo, dominant color {} ({}), {}x{}",
                orientation.label(),
                color_name(hex),
                hex,
                width,
                height
            ),
            None => format!("{} photo, {}x{}", orientation.label(), width, height),
        };

        Annotation {
            source: StageKind::Local,
            caption,
            colors,
            tags,
            category: None,
            mood: None,
            objects: Vec::new(),
            features: Some(ImageFeatures {
                width,
                height,
                aspect_ratio: width as f32 / height.max(1) as f32,
                edge_density,
                color_histogram,
            }),
        }
    }
}

/// Map a hex color onto a small named palette using HSV thresholds.
pub fn color_name(hex: &str) -> &'static str {
    let Some([r, g, b]) = parse_hex(hex) else {
        return "colorful";
    };
    let (h, s, v) = rgb_to_hsv(r, g, b);

    if v < 0.15 {
        return "black";
    }
    if s < 0.2 {
        return if v > 0.8 {
            "white"
        } else if v < 0.3 {
            "black"
        } else {
            "gray"
        };
    }

    match h {
        h if !(1.0 / 12.0..11.0 / 12.0).contains(&h) => "red",
        h if h < 0.25 => "yellow",
        h if h < 5.0 / 12.0 => "green",
        h if h < 7.0 / 12.0 => "cyan",
        h if h < 0.75 => "blue",
        _ => "purple",
    }
}

/// Hue in [0, 1), saturation and value in [0, 1].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max == 0.0 { 0.0 } else { delta / max };
    if delta == 0.0 {
        return (0.0, s, v);
    }

    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    (h / 6.0, s, v)
}

/// Fraction of interior pixels whose Sobel gradient magnitude exceeds the
/// edge threshold.
fn edge_density(gray: &GrayImage) -> f32 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f32;
    let mut edges = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x - 1, y)
                - px(x - 1, y + 1);
            let gy = px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x, y - 1)
                - px(x + 1, y - 1);
            if (gx * gx + gy * gy).sqrt() > EDGE_MAGNITUDE_THRESHOLD {
                edges += 1;
            }
        }
    }

    edges as f32 / ((width - 2) as f32 * (height - 2) as f32)
}

fn color_histogram(img: &DynamicImage) -> ColorHistogram {
    let rgb = img.to_rgb8();
    let mut bins = [[0u64; HISTOGRAM_BINS]; 3];
    let bin_width = 256 / HISTOGRAM_BINS;
    for pixel in rgb.pixels() {
        for c in 0..3 {
            bins[c][pixel[c] as usize / bin_width] += 1;
        }
    }

    let total = (rgb.width() as u64 * rgb.height() as u64).max(1) as f32;
    let normalize = |channel: &[u64; HISTOGRAM_BINS]| -> Vec<f32> {
        channel.iter().map(|&n| n as f32 / total).collect()
    };

    ColorHistogram {
        r: normalize(&bins[0]),
        g: normalize(&bins[1]),
        b: normalize(&bins[2]),
    }
}
