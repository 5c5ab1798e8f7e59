//! Base height map for terrains
//!
//! The terrain kernel samples this map before applying its layers. It is
//! generated on the CPU with fractal Perlin noise, one row per rayon task.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

/// Parameters of the generated base height map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightMapSettings {
    pub seed: u32,
    /// Texels per side
    pub resolution: u32,
    pub octaves: usize,
    pub frequency: f64,
    /// Heights are scaled into `[0, amplitude]`
    pub amplitude: f32,
}

impl Default for HeightMapSettings {
    fn default() -> Self {
        Self {
            seed: 1,
            resolution: 256,
            octaves: 5,
            frequency: 2.0,
            amplitude: 1.0,
        }
    }
}

/// Square grid of heights, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    pub resolution: u32,
    pub heights: Vec<f32>,
}

impl HeightMap {
    /// A flat map, used when a scene has no terrain
    pub fn flat(resolution: u32) -> Self {
        let resolution = resolution.max(1);
        Self {
            resolution,
            heights: vec![0.0; (resolution * resolution) as usize],
        }
    }

    /// Generate the map from fractal noise
    pub fn generate(settings: &HeightMapSettings) -> Self {
        let resolution = settings.resolution.max(1);
        let fbm: Fbm<Perlin> = Fbm::new(settings.seed)
            .set_octaves(settings.octaves)
            .set_frequency(settings.frequency);

        let mut heights = vec![0.0f32; (resolution * resolution) as usize];
        heights
            .par_chunks_mut(resolution as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let v = y as f64 / resolution as f64;
                for (x, h) in row.iter_mut().enumerate() {
                    let u = x as f64 / resolution as f64;
                    let n = fbm.get([u, v]) as f32;
                    *h = (n * 0.5 + 0.5).clamp(0.0, 1.0) * settings.amplitude;
                }
            });

        Self {
            resolution,
            heights,
        }
    }

    /// Height at integer texel coordinates, clamped to the edges
    pub fn texel(&self, x: i64, y: i64) -> f32 {
        let max = i64::from(self.resolution) - 1;
        let x = x.clamp(0, max) as usize;
        let y = y.clamp(0, max) as usize;
        self.heights[y * self.resolution as usize + x]
    }

    /// Bilinear sample at normalized coordinates in `[0, 1]`
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let fx = u * (self.resolution as f32 - 1.0);
        let fy = v * (self.resolution as f32 - 1.0);
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0) * (1.0 - tx) + self.texel(x0 + 1, y0) * tx;
        let bottom = self.texel(x0, y0 + 1) * (1.0 - tx) + self.texel(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_generate_is_deterministic() {
        let settings = HeightMapSettings {
            resolution: 32,
            ..Default::default()
        };
        let a = HeightMap::generate(&settings);
        let b = HeightMap::generate(&settings);
        assert_eq!(a, b);
        assert_eq!(a.heights.len(), 32 * 32);
        assert!(a.heights.iter().all(|h| (0.0..=1.0).contains(h)));
    }

    #[test]
    fn test_sample_flat() {
        let map = HeightMap::flat(4);
        assert_relative_eq!(map.sample(0.3, 0.9), 0.0);
    }

    #[test]
    fn test_sample_interpolates() {
        let map = HeightMap {
            resolution: 2,
            heights: vec![0.0, 1.0, 0.0, 1.0],
        };
        assert_relative_eq!(map.sample(0.5, 0.5), 0.5);
        assert_relative_eq!(map.sample(1.0, 0.0), 1.0);
    }
}
