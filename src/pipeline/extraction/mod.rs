pub mod homography;
pub mod region_extractor;

pub use region_extractor::{ImageRegion, PlanarRegionExtractor, RegionExtractor};
