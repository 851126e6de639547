//! Registration collaborators driven by the optimizer
//!
//! - N-D images with physical geometry and N-linear interpolation
//! - Grid and random image samplers
//! - Cost functions evaluated on sample sets

pub mod image;
pub mod metric;
pub mod sampler;

pub use image::Image;
pub use metric::{CostFunction, MeanSquaresMetric};
pub use sampler::{GridSampler, ImageSample, ImageSampler, RandomSampler, SampleContainer};
