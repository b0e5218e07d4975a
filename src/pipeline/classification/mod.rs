pub mod classifier;
pub mod service;
pub mod template;
pub mod trace_layer;

pub use classifier::{Classification, Classifier, Label};
pub use service::{ClassifierBuilder, ClassifierHandle, ClassifierService};
pub use template::TemplateClassifier;
pub use trace_layer::ClassifyTraceLayer;
