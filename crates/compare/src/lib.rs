//! Shotcheck Compare
//!
//! File-backed pixel comparison for shotcheck. [`ImageComparator`] loads a
//! reference and a test PNG, counts differing pixels, locates the bounding
//! box of the change and renders a highlighted diff image.

pub mod error;
pub mod visual;

pub use error::{CompareError, CompareResult};
pub use visual::{diff_images, CompareConfig, ImageComparator};
