use std::f32::consts::FRAC_PI_2;
use std::time::Duration;

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::pipeline::annotation::scene::{
    Animation, NodeContent, NodeId, PlaneStyle, SceneGraph, Transform,
};
use crate::pipeline::classification::Label;
use crate::tracking::{AnchorId, TrackedAnchor};

// Approximate advance of one glyph of the default text face, in text units.
const GLYPH_ADVANCE: f32 = 20.0;
const PLANE_CORNER_RADIUS: f32 = 0.005;
const HIGHLIGHT_ALPHA: f32 = 0.5;
const SPIN_PERIOD: Duration = Duration::from_secs(10);

/// A label attached under an anchor's node.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub anchor_id: AnchorId,
    pub text: String,
    /// Placement relative to the anchor, in metres.
    pub offset: Vector3<f32>,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct PresenterSettings {
    pub label_gap: f32,
    pub label_scale: f32,
    pub model_asset: String,
}

impl Default for PresenterSettings {
    fn default() -> Self {
        Self {
            label_gap: 0.012,
            label_scale: 0.00075,
            model_asset: "diamond".to_string(),
        }
    }
}

/// Owns the scene graph and every mutation the pipeline makes to it.
pub struct AnnotationPresenter {
    scene: SceneGraph,
    settings: PresenterSettings,
}

impl AnnotationPresenter {
    pub fn new(settings: PresenterSettings) -> Self {
        Self {
            scene: SceneGraph::new(),
            settings,
        }
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// Creates the anchor's node with its planes and one decorative model.
    pub fn present_anchor(&mut self, anchor: &TrackedAnchor) -> NodeId {
        let node = self.scene.attach_anchor(anchor.id, &anchor.pose);
        self.add_indicator_plane(anchor);
        self.add_highlight_plane(anchor);
        self.add_decorative_model(anchor.id);
        node
    }

    pub fn move_anchor(&mut self, anchor: &TrackedAnchor) {
        self.scene.update_anchor(anchor.id, &anchor.pose);
    }

    pub fn remove_anchor(&mut self, anchor_id: AnchorId) {
        if self.scene.detach_anchor(anchor_id).is_some() {
            debug!("Removed scene node for anchor {}", anchor_id);
        }
    }

    pub fn clear(&mut self) {
        self.scene.clear_anchors();
    }

    /// Wireframe outline of the reference image, lying on the card.
    pub fn add_indicator_plane(&mut self, anchor: &TrackedAnchor) -> Option<NodeId> {
        self.add_plane(anchor, PlaneStyle::Wireframe, 0.0)
    }

    /// Translucent fill over the card.
    pub fn add_highlight_plane(&mut self, anchor: &TrackedAnchor) -> Option<NodeId> {
        self.add_plane(
            anchor,
            PlaneStyle::Translucent {
                alpha: HIGHLIGHT_ALPHA,
            },
            PLANE_CORNER_RADIUS,
        )
    }

    fn add_plane(
        &mut self,
        anchor: &TrackedAnchor,
        style: PlaneStyle,
        corner_radius: f32,
    ) -> Option<NodeId> {
        let content = NodeContent::Plane {
            width: anchor.reference.physical_width as f32,
            height: anchor.reference.physical_height as f32,
            corner_radius,
            style,
        };
        self.scene
            .add_child(anchor.id, content, Transform::tilted_x(-FRAC_PI_2))
            .ok()
    }

    /// Spinning model above the card. An anchor gets at most one.
    pub fn add_decorative_model(&mut self, anchor_id: AnchorId) -> Option<NodeId> {
        let root = self.scene.anchor_node(anchor_id)?;
        let existing = self
            .scene
            .children(root)
            .find(|child| matches!(child.content, NodeContent::Model { .. }))
            .map(|child| child.id);
        if existing.is_some() {
            return existing;
        }

        let content = NodeContent::Model {
            asset: self.settings.model_asset.clone(),
        };
        let node = self
            .scene
            .add_child(anchor_id, content, Transform::identity())
            .ok()?;
        self.scene.run_animation(
            node,
            Animation::Spin {
                axis: Vector3::y(),
                period: SPIN_PERIOD,
            },
        );
        Some(node)
    }

    /// Hangs `label` just past the card's near edge. A missing anchor node
    /// means the anchor went away while classifying; the label is dropped.
    pub fn annotate(&mut self, anchor_id: AnchorId, label: &Label) -> Option<Annotation> {
        let Some(root) = self.scene.anchor_node(anchor_id) else {
            debug!(
                "Dropping label '{}': no scene node for anchor {}",
                label, anchor_id
            );
            return None;
        };

        let text = label.as_str().to_string();
        let offset = Vector3::new(
            0.0,
            0.0,
            self.scene.max_z_extent(root) + self.settings.label_gap,
        );
        let transform = Transform {
            position: offset,
            scale: self.settings.label_scale,
            pivot: Vector3::new(text.chars().count() as f32 * GLYPH_ADVANCE / 2.0, 0.0, 0.0),
            ..Transform::tilted_x(-FRAC_PI_2)
        };
        let content = NodeContent::Text {
            text: text.clone(),
            extrusion_depth: 0.0,
        };

        match self.scene.add_child(anchor_id, content, transform) {
            Ok(node) => {
                info!("Annotated anchor {} with '{}'", anchor_id, text);
                Some(Annotation {
                    anchor_id,
                    text,
                    offset,
                    node,
                })
            }
            Err(e) => {
                debug!("Dropping label '{}': {}", label, e);
                None
            }
        }
    }
}

impl Default for AnnotationPresenter {
    fn default() -> Self {
        Self::new(PresenterSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::geometry::Pose;
    use crate::tracking::ReferenceImage;

    fn anchor() -> TrackedAnchor {
        TrackedAnchor::new(
            AnchorId::new(),
            ReferenceImage::new("island", 0.063, 0.088),
            Pose::identity(),
        )
    }

    fn count(presenter: &AnnotationPresenter, anchor_id: AnchorId, kind: &str) -> usize {
        let Some(root) = presenter.scene().anchor_node(anchor_id) else {
            return 0;
        };
        presenter
            .scene()
            .children(root)
            .filter(|n| match (&n.content, kind) {
                (NodeContent::Plane { .. }, "plane") => true,
                (NodeContent::Model { .. }, "model") => true,
                (NodeContent::Text { .. }, "text") => true,
                _ => false,
            })
            .count()
    }

    #[test]
    fn presenting_anchor_adds_planes_and_one_model() {
        let mut presenter = AnnotationPresenter::default();
        let anchor = anchor();
        presenter.present_anchor(&anchor);
        presenter.add_decorative_model(anchor.id);

        assert_eq!(count(&presenter, anchor.id, "plane"), 2);
        assert_eq!(count(&presenter, anchor.id, "model"), 1);
        let root = presenter.scene().anchor_node(anchor.id).unwrap();
        let model = presenter
            .scene()
            .children(root)
            .find(|n| matches!(n.content, NodeContent::Model { .. }))
            .unwrap();
        assert!(matches!(
            model.animation,
            Some(Animation::Spin { period, .. }) if period == SPIN_PERIOD
        ));
    }

    #[test]
    fn label_sits_past_card_edge() {
        let mut presenter = AnnotationPresenter::default();
        let anchor = anchor();
        presenter.present_anchor(&anchor);

        let annotation = presenter.annotate(anchor.id, &Label::new("Island")).unwrap();
        assert_eq!(annotation.text, "Island");
        assert!((annotation.offset.z - (0.044 + 0.012)).abs() < 1e-6);

        let node = presenter.scene().node(annotation.node).unwrap();
        assert_eq!(node.transform.scale, 0.00075);
        assert_eq!(node.transform.pivot.x, 60.0);
        assert_eq!(count(&presenter, anchor.id, "text"), 1);
    }

    #[test]
    fn annotating_missing_anchor_is_silent() {
        let mut presenter = AnnotationPresenter::default();
        let anchor = anchor();
        presenter.present_anchor(&anchor);
        presenter.remove_anchor(anchor.id);

        assert!(presenter.annotate(anchor.id, &Label::new("Island")).is_none());
        assert_eq!(presenter.scene().node_count(), 0);
    }
}
