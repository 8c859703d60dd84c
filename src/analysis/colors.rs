//! Dominant color extraction by k-means clustering of pixel values.

use image::{DynamicImage, GenericImageView};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

pub const DEFAULT_PALETTE_SIZE: usize = 5;

/// Stop when no centroid moves further than this (RGB units).
const EPSILON: f32 = 1.0;
const MAX_ITERATIONS: usize = 20;
/// Independent random initialisations; the most compact clustering wins.
const ATTEMPTS: usize = 10;
/// Pixels are sampled from a copy no larger than this on its longest edge.
const SAMPLE_EDGE: u32 = 128;

type Rgb = [f32; 3];

#[derive(Debug, Clone)]
struct Clustering {
    centroids: Vec<Rgb>,
    sizes: Vec<usize>,
    compactness: f32,
}

/// Extract `k` dominant colors as `#rrggbb`, most populous cluster first.
///
/// Returns an empty list when the image has no pixels. Ordering beyond
/// "first is dominant" is not stable across calls.
pub fn extract_dominant_colors(image: &DynamicImage, k: usize) -> Vec<String> {
    let pixels = sample_pixels(image);
    extract_from_pixels(&pixels, k, rand::random())
}

fn extract_from_pixels(pixels: &[Rgb], k: usize, seed: u64) -> Vec<String> {
    match kmeans(pixels, k, seed) {
        Some(clustering) => {
            let mut order: Vec<usize> = (0..clustering.centroids.len()).collect();
            order.sort_by(|&a, &b| clustering.sizes[b].cmp(&clustering.sizes[a]));
            order
                .into_iter()
                .map(|i| to_hex(&clustering.centroids[i]))
                .collect()
        }
        None => Vec::new(),
    }
}

fn sample_pixels(image: &DynamicImage) -> Vec<Rgb> {
    let (width, height) = image.dimensions();
    let rgb = if width.max(height) > SAMPLE_EDGE {
        image.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE).to_rgb8()
    } else {
        image.to_rgb8()
    };

    rgb.pixels()
        .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect()
}

fn kmeans(pixels: &[Rgb], k: usize, seed: u64) -> Option<Clustering> {
    let k = k.min(pixels.len());
    if k == 0 {
        return None;
    }

    (0..ATTEMPTS)
        .into_par_iter()
        .map(|attempt| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(attempt as u64));
            cluster_once(pixels, k, &mut rng)
        })
        .min_by(|a, b| a.compactness.total_cmp(&b.compactness))
}

fn cluster_once(pixels: &[Rgb], k: usize, rng: &mut StdRng) -> Clustering {
    let mut centroids: Vec<Rgb> = (0..k)
        .map(|_| pixels[rng.random_range(0..pixels.len())])
        .collect();
    let mut labels = vec![0usize; pixels.len()];

    for _ in 0..MAX_ITERATIONS {
        for (label, pixel) in labels.iter_mut().zip(pixels) {
            *label = nearest(&centroids, pixel).0;
        }

        let mut sums = vec![[0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (&label, pixel) in labels.iter().zip(pixels) {
            for c in 0..3 {
                sums[label][c] += pixel[c] as f64;
            }
            counts[label] += 1;
        }

        let mut max_shift = 0f32;
        for i in 0..k {
            // An empty cluster keeps its previous centroid.
            if counts[i] == 0 {
                continue;
            }
            let n = counts[i] as f64;
            let updated = [
                (sums[i][0] / n) as f32,
                (sums[i][1] / n) as f32,
                (sums[i][2] / n) as f32,
            ];
            max_shift = max_shift.max(distance_sq(&centroids[i], &updated).sqrt());
            centroids[i] = updated;
        }

        if max_shift < EPSILON {
            break;
        }
    }

    let mut sizes = vec![0usize; k];
    let mut compactness = 0f32;
    for pixel in pixels {
        let (label, dist) = nearest(&centroids, pixel);
        sizes[label] += 1;
        compactness += dist;
    }

    Clustering {
        centroids,
        sizes,
        compactness,
    }
}

fn nearest(centroids: &[Rgb], pixel: &Rgb) -> (usize, f32) {
    let mut best = (0, f32::MAX);
    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance_sq(centroid, pixel);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn distance_sq(a: &Rgb, b: &Rgb) -> f32 {
    (0..3).map(|c| (a[c] - b[c]) * (a[c] - b[c])).sum()
}

fn to_hex(color: &Rgb) -> String {
    let channel = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(color[0]),
        channel(color[1]),
        channel(color[2])
    )
}

/// Parse `#rrggbb` (leading `#` optional).
pub fn parse_hex(hex: &str) -> Option<[u8; 3]> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}
