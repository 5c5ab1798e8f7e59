//! Per-render settings and completion callbacks

use std::fmt;

use image::Rgba32FImage;

use crate::stage::OutputType;

/// Called with `(done, total)` scanline chunks after each chunk
pub type ProgressCallback = Box<dyn FnMut(u32, u32) + Send>;

/// Called once with the finished image
pub type FinishedCallback = Box<dyn FnOnce(Rgba32FImage) + Send>;

/// What one call to `render` should produce
pub struct RenderSettings {
    /// Hit passes per chunk; the first is the camera ray, the others follow reflections
    pub reflections: u32,
    /// Accumulated samples
    pub samples: u32,
    pub output: OutputType,
    pub time: f32,
    pub seed: f32,
    on_progress: Option<ProgressCallback>,
    on_finished: Option<FinishedCallback>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            reflections: 2,
            samples: 1,
            output: OutputType::FinalImage,
            time: 0.0,
            seed: 0.0,
            on_progress: None,
            on_finished: None,
        }
    }
}

impl fmt::Debug for RenderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSettings")
            .field("reflections", &self.reflections)
            .field("samples", &self.samples)
            .field("output", &self.output)
            .field("time", &self.time)
            .field("seed", &self.seed)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_finished", &self.on_finished.is_some())
            .finish()
    }
}

impl RenderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reflections(mut self, reflections: u32) -> Self {
        self.reflections = reflections;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_output(mut self, output: OutputType) -> Self {
        self.output = output;
        self
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    pub fn with_seed(mut self, seed: f32) -> Self {
        self.seed = seed;
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(u32, u32) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_finished(mut self, callback: impl FnOnce(Rgba32FImage) + Send + 'static) -> Self {
        self.on_finished = Some(Box::new(callback));
        self
    }

    /// Hit passes per chunk, at least one
    pub fn bounce_count(&self) -> u32 {
        if self.output.is_auxiliary() {
            1
        } else {
            self.reflections.max(1)
        }
    }

    /// Samples to accumulate, at least one
    pub fn sample_count(&self) -> u32 {
        if self.output.is_auxiliary() {
            1
        } else {
            self.samples.max(1)
        }
    }

    pub(crate) fn report_progress(&mut self, done: u32, total: u32) {
        if let Some(callback) = self.on_progress.as_mut() {
            callback(done, total);
        }
    }

    /// Deliver the image; later calls do nothing
    pub(crate) fn finish(&mut self, image: Rgba32FImage) -> bool {
        match self.on_finished.take() {
            Some(callback) => {
                callback(image);
                true
            }
            None => false,
        }
    }
}
