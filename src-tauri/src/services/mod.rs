pub mod classifier;
pub mod image_loader;
pub mod knowledge;
pub mod pipeline;
pub mod speech;
