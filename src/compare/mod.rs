pub mod comparer;
pub mod reference;

pub use comparer::{DifferenceReport, ImageComparer};
pub use reference::ReferenceImage;
