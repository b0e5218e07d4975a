pub mod annotation;
pub mod classification;
pub mod extraction;
pub mod orchestration;
