//! Media pipeline: attachment download, raster transform, object-store
//! upload, and the resulting public URLs.

pub mod object_store;
pub mod pipeline;

pub use object_store::{ObjectStore, S3ObjectStore, Upload};
pub use pipeline::{MediaPipeline, ProcessedImage};
