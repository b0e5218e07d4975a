//! In-memory scene graph. Anchor nodes are roots; everything the pipeline
//! draws hangs off them. Only the presentation loop may hold one.

use std::collections::HashMap;
use std::time::Duration;

use nalgebra::{UnitQuaternion, Vector3};

use crate::common::geometry::Pose;
use crate::error::AnnotationError;
use crate::tracking::AnchorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaneStyle {
    Wireframe,
    Translucent { alpha: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    AnchorRoot(AnchorId),
    Plane {
        width: f32,
        height: f32,
        corner_radius: f32,
        style: PlaneStyle,
    },
    Text {
        text: String,
        extrusion_depth: f32,
    },
    Model {
        asset: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: f32,
    /// Point in the node's own space that `position` refers to.
    pub pivot: Vector3<f32>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: 1.0,
            pivot: Vector3::zeros(),
        }
    }

    pub fn from_pose(pose: &Pose) -> Self {
        Self {
            position: pose.position().cast::<f32>(),
            rotation: pose.orientation().cast::<f32>(),
            ..Self::identity()
        }
    }

    /// Rotated about local X, as used to lay geometry flat on the card.
    pub fn tilted_x(angle: f32) -> Self {
        Self {
            rotation: UnitQuaternion::from_euler_angles(angle, 0.0, 0.0),
            ..Self::identity()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Animation {
    /// Full turns about `axis`, one per `period`, forever.
    Spin {
        axis: Vector3<f32>,
        period: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub content: NodeContent,
    pub transform: Transform,
    pub animation: Option<Animation>,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneNode>,
    anchors: HashMap<AnchorId, NodeId>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    /// Creates the root node for an anchor, or moves the existing one.
    pub fn attach_anchor(&mut self, anchor_id: AnchorId, pose: &Pose) -> NodeId {
        if let Some(id) = self.update_anchor(anchor_id, pose) {
            return id;
        }
        let id = self.allocate();
        self.nodes.insert(
            id,
            SceneNode {
                id,
                parent: None,
                children: Vec::new(),
                content: NodeContent::AnchorRoot(anchor_id),
                transform: Transform::from_pose(pose),
                animation: None,
            },
        );
        self.anchors.insert(anchor_id, id);
        id
    }

    pub fn update_anchor(&mut self, anchor_id: AnchorId, pose: &Pose) -> Option<NodeId> {
        let id = *self.anchors.get(&anchor_id)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.transform = Transform::from_pose(pose);
        }
        Some(id)
    }

    /// Removes an anchor's node and everything beneath it.
    pub fn detach_anchor(&mut self, anchor_id: AnchorId) -> Option<NodeId> {
        let id = self.anchors.remove(&anchor_id)?;
        self.remove_subtree(id);
        Some(id)
    }

    pub fn clear_anchors(&mut self) {
        let anchors: Vec<_> = self.anchors.keys().copied().collect();
        for anchor_id in anchors {
            self.detach_anchor(anchor_id);
        }
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children);
            }
        }
    }

    pub fn anchor_node(&self, anchor_id: AnchorId) -> Option<NodeId> {
        self.anchors.get(&anchor_id).copied()
    }

    pub fn add_child(
        &mut self,
        anchor_id: AnchorId,
        content: NodeContent,
        transform: Transform,
    ) -> Result<NodeId, AnnotationError> {
        let parent = self
            .anchor_node(anchor_id)
            .ok_or(AnnotationError::TargetMissing(anchor_id))?;
        let id = self.allocate();
        self.nodes.insert(
            id,
            SceneNode {
                id,
                parent: Some(parent),
                children: Vec::new(),
                content,
                transform,
                animation: None,
            },
        );
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.push(id);
        }
        Ok(id)
    }

    pub fn run_animation(&mut self, id: NodeId, animation: Animation) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.animation = Some(animation);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &SceneNode> {
        self.nodes
            .get(&id)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(move |child| self.nodes.get(child))
    }

    /// Furthest extent along local +Z of the flat geometry under a node.
    pub fn max_z_extent(&self, id: NodeId) -> f32 {
        self.children(id)
            .filter_map(|child| match child.content {
                NodeContent::Plane { height, .. } => {
                    Some(child.transform.position.z + height / 2.0)
                }
                _ => None,
            })
            .fold(0.0, f32::max)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(height: f32) -> NodeContent {
        NodeContent::Plane {
            width: 0.063,
            height,
            corner_radius: 0.0,
            style: PlaneStyle::Wireframe,
        }
    }

    #[test]
    fn attaching_same_anchor_twice_reuses_node() {
        let mut scene = SceneGraph::new();
        let anchor = AnchorId::new();
        let first = scene.attach_anchor(anchor, &Pose::identity());
        let second = scene.attach_anchor(anchor, &Pose::from_euler([0.0, 0.0, 1.0], [0.0; 3]));
        assert_eq!(first, second);
        assert_eq!(scene.node_count(), 1);
        assert_eq!(scene.node(first).unwrap().transform.position.z, 1.0);
    }

    #[test]
    fn detaching_anchor_removes_subtree() {
        let mut scene = SceneGraph::new();
        let keep = AnchorId::new();
        let gone = AnchorId::new();
        scene.attach_anchor(keep, &Pose::identity());
        scene.attach_anchor(gone, &Pose::identity());
        scene.add_child(keep, plane(0.088), Transform::identity()).unwrap();
        scene.add_child(gone, plane(0.088), Transform::identity()).unwrap();
        scene.add_child(gone, plane(0.088), Transform::identity()).unwrap();

        scene.detach_anchor(gone);
        assert!(scene.anchor_node(keep).is_some());
        assert_eq!(scene.node_count(), 2);
        assert!(scene.anchor_node(gone).is_none());
    }

    #[test]
    fn adding_to_missing_anchor_fails() {
        let mut scene = SceneGraph::new();
        let anchor = AnchorId::new();
        assert_eq!(
            scene.add_child(anchor, plane(0.1), Transform::identity()),
            Err(AnnotationError::TargetMissing(anchor))
        );
    }

    #[test]
    fn max_z_extent_comes_from_planes() {
        let mut scene = SceneGraph::new();
        let anchor = AnchorId::new();
        let root = scene.attach_anchor(anchor, &Pose::identity());
        assert_eq!(scene.max_z_extent(root), 0.0);
        scene.add_child(anchor, plane(0.088), Transform::identity()).unwrap();
        scene
            .add_child(
                anchor,
                NodeContent::Model {
                    asset: "diamond".to_string(),
                },
                Transform::identity(),
            )
            .unwrap();
        assert!((scene.max_z_extent(root) - 0.044).abs() < 1e-6);
    }
}
