pub mod presenter;
pub mod scene;

pub use presenter::{Annotation, AnnotationPresenter, PresenterSettings};
pub use scene::{Animation, NodeContent, NodeId, PlaneStyle, SceneGraph, SceneNode, Transform};
