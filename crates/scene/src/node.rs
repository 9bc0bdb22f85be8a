//! Node arena and depth-first traversal.
//!
//! Nodes live in one vector owned by the [`Scene`]. Parent and child links are
//! [`NodeId`] indices into it, so nodes can be moved between parents (or whole
//! trees grafted from another scene) by rewriting indices alone.
//!
//! Local transforms follow the "apply after" convention: `translate` then
//! `rotate_z` moves a point first and then rotates the moved point about the
//! origin. A node's world transform is its parent's world transform times its
//! local transform; the root's parent is the identity.

use glam::{Mat4, Vec3};

use tessera_resources::MaterialId;

use crate::error::{SceneError, SceneResult};

/// Index of a node inside its [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct Node<D> {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Mat4,
    material: MaterialId,
    drawable: Option<D>,
}

impl<D> Node<D> {
    fn new(parent: Option<NodeId>, material: MaterialId, drawable: Option<D>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            local: Mat4::IDENTITY,
            material,
            drawable,
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local
    }

    #[inline]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    #[inline]
    pub fn drawable(&self) -> Option<&D> {
        self.drawable.as_ref()
    }

    #[inline]
    pub fn drawable_mut(&mut self) -> Option<&mut D> {
        self.drawable.as_mut()
    }

    /// Whether traversal should update and draw this node.
    #[inline]
    pub fn is_renderable(&self) -> bool {
        self.material.is_assignable() && self.drawable.is_some()
    }
}

/// A tree of nodes rooted at an empty, untransformed node.
pub struct Scene<D> {
    nodes: Vec<Node<D>>,
}

impl<D> Scene<D> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, MaterialId::NONE, None)],
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A scene always holds its root; this is true when nothing else was added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<D>> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<D>> {
        self.nodes.get_mut(id.0)
    }

    /// Append a node as the last child of `parent`.
    pub fn add_node(&mut self, parent: NodeId, material: MaterialId, drawable: Option<D>) -> SceneResult<NodeId> {
        self.check(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(Some(parent), material, drawable));
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Append a grouping node with no material and nothing to draw.
    pub fn add_group(&mut self, parent: NodeId) -> SceneResult<NodeId> {
        self.add_node(parent, MaterialId::NONE, None)
    }

    pub fn set_local_transform(&mut self, id: NodeId, transform: Mat4) -> SceneResult<()> {
        self.node_mut_checked(id)?.local = transform;
        Ok(())
    }

    /// Translate after the current local transform.
    pub fn translate(&mut self, id: NodeId, offset: Vec3) -> SceneResult<()> {
        let node = self.node_mut_checked(id)?;
        node.local = Mat4::from_translation(offset) * node.local;
        Ok(())
    }

    /// Rotate about the z axis after the current local transform.
    pub fn rotate_z(&mut self, id: NodeId, degrees: f32) -> SceneResult<()> {
        let node = self.node_mut_checked(id)?;
        node.local = Mat4::from_rotation_z(degrees.to_radians()) * node.local;
        Ok(())
    }

    /// World transform of `id`, computed by walking up to the root.
    pub fn world_transform(&self, id: NodeId) -> SceneResult<Mat4> {
        let mut world = self.node_checked(id)?.local;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            let node = &self.nodes[parent.0];
            world = node.local * world;
            current = node.parent;
        }
        Ok(world)
    }

    /// Move `node` (with its subtree) to the end of `new_parent`'s children.
    ///
    /// # Errors
    ///
    /// [`SceneError::CyclicParent`] when `new_parent` is `node` or one of its
    /// descendants, or when `node` is the root.
    pub fn reparent(&mut self, node: NodeId, new_parent: NodeId) -> SceneResult<()> {
        self.check(node)?;
        self.check(new_parent)?;
        if node == self.root() || self.is_ancestor_or_self(node, new_parent) {
            return Err(SceneError::CyclicParent {
                node,
                parent: new_parent,
            });
        }

        if let Some(old_parent) = self.nodes[node.0].parent {
            self.nodes[old_parent.0].children.retain(|&child| child != node);
        }
        self.nodes[new_parent.0].children.push(node);
        self.nodes[node.0].parent = Some(new_parent);
        Ok(())
    }

    /// Move every node of `other` into this scene under `parent`.
    ///
    /// `other`'s root becomes a new child of `parent` and keeps its local
    /// transform. Returns the grafted root's new id.
    pub fn graft(&mut self, parent: NodeId, other: Scene<D>) -> SceneResult<NodeId> {
        self.check(parent)?;
        let base = self.nodes.len();
        let remap = |id: NodeId| NodeId(id.0 + base);

        for mut node in other.nodes {
            node.parent = Some(node.parent.map_or(parent, remap));
            for child in &mut node.children {
                *child = remap(*child);
            }
            self.nodes.push(node);
        }

        let grafted = NodeId(base);
        self.nodes[parent.0].children.push(grafted);
        Ok(grafted)
    }

    /// Visit every node in pre-order, first child before its siblings.
    pub fn traverse_depth_first<F>(&self, mut visit: F)
    where
        F: FnMut(NodeId, &Node<D>),
    {
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            visit(id, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    /// Pre-order node ids paired with their world transforms.
    pub fn world_transforms(&self) -> Vec<(NodeId, Mat4)> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), Mat4::IDENTITY)];
        while let Some((id, parent_world)) = stack.pop() {
            let node = &self.nodes[id.0];
            let world = parent_world * node.local;
            visited.push((id, world));
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
        visited
    }

    /// Run `visit` on every renderable node in pre-order with its world
    /// transform. Stops at the first error.
    pub fn for_each_renderable_mut<F, E>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(NodeId, MaterialId, &mut D, &Mat4) -> Result<(), E>,
    {
        for (id, world) in self.world_transforms() {
            let node = &mut self.nodes[id.0];
            if !node.material.is_assignable() {
                continue;
            }
            let material = node.material;
            if let Some(drawable) = node.drawable.as_mut() {
                visit(id, material, drawable, &world)?;
            }
        }
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes[id.0].parent {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    }

    fn check(&self, id: NodeId) -> SceneResult<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(SceneError::InvalidNode(id))
        }
    }

    fn node_checked(&self, id: NodeId) -> SceneResult<&Node<D>> {
        self.nodes.get(id.0).ok_or(SceneError::InvalidNode(id))
    }

    fn node_mut_checked(&mut self, id: NodeId) -> SceneResult<&mut Node<D>> {
        self.nodes.get_mut(id.0).ok_or(SceneError::InvalidNode(id))
    }
}

impl<D> Default for Scene<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_mat_eq(actual: Mat4, expected: Mat4) {
        for (a, e) in actual.to_cols_array().iter().zip(expected.to_cols_array().iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-6);
        }
    }

    /// A -> (B -> (E, F), C, D -> (G)), labelled by drawable.
    fn lettered_tree() -> Scene<char> {
        let mut scene = Scene::new();
        let root = scene.root();
        let m = MaterialId::new(MaterialId::FIRST_ASSIGNABLE);
        let a = scene.add_node(root, m, Some('A')).unwrap();
        let b = scene.add_node(a, m, Some('B')).unwrap();
        scene.add_node(a, m, Some('C')).unwrap();
        let d = scene.add_node(a, m, Some('D')).unwrap();
        scene.add_node(b, m, Some('E')).unwrap();
        scene.add_node(b, m, Some('F')).unwrap();
        scene.add_node(d, m, Some('G')).unwrap();
        scene
    }

    fn visit_order(scene: &Scene<char>) -> String {
        let mut order = String::new();
        scene.traverse_depth_first(|_, node| {
            if let Some(&label) = node.drawable() {
                order.push(label);
            }
        });
        order
    }

    #[test]
    fn test_depth_first_order() {
        assert_eq!(visit_order(&lettered_tree()), "ABEFCDG");
    }

    #[test]
    fn test_renderable_visit_follows_traversal() {
        let mut scene = lettered_tree();
        let mut order = String::new();
        scene
            .for_each_renderable_mut(|_, _, label, _| {
                order.push(*label);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(order, "ABEFCDG");
    }

    #[test]
    fn test_reserved_material_and_empty_nodes_skipped() {
        let mut scene = Scene::new();
        let root = scene.root();
        let group = scene.add_group(root).unwrap();
        scene.add_node(group, MaterialId::new(99), Some(1)).unwrap();
        scene.add_node(group, MaterialId::new(100), None).unwrap();
        scene.add_node(group, MaterialId::new(100), Some(2)).unwrap();

        let mut seen = Vec::new();
        scene
            .for_each_renderable_mut(|_, _, value, _| {
                seen.push(*value);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_local_transform_round_trip_under_identity_parent() {
        let mut scene: Scene<()> = Scene::new();
        let root = scene.root();
        let node = scene.add_group(root).unwrap();
        scene.translate(node, Vec3::new(0.3, 0.0, 0.0)).unwrap();
        scene.rotate_z(node, 90.0).unwrap();

        let expected = Mat4::from_rotation_z(90f32.to_radians())
            * Mat4::from_translation(Vec3::new(0.3, 0.0, 0.0));
        assert_mat_eq(scene.node(node).unwrap().local_transform(), expected);
        assert_mat_eq(scene.world_transform(node).unwrap(), expected);

        // Translated then rotated: (0.3, 0, 0) ends up on the y axis.
        let moved = scene.world_transform(node).unwrap().transform_point3(Vec3::ZERO);
        assert_abs_diff_eq!(moved.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(moved.y, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_identity_child_matches_parent_world() {
        let mut scene: Scene<()> = Scene::new();
        let root = scene.root();
        let parent = scene.add_group(root).unwrap();
        scene.translate(parent, Vec3::new(0.3, 0.0, 0.0)).unwrap();
        scene.rotate_z(parent, 90.0).unwrap();
        let child = scene.add_group(parent).unwrap();

        let parent_world = scene.world_transform(parent).unwrap();
        assert_mat_eq(scene.world_transform(child).unwrap(), parent_world);

        let worlds = scene.world_transforms();
        let (_, child_world) = worlds.iter().find(|(id, _)| *id == child).unwrap();
        assert_mat_eq(*child_world, parent_world);
    }

    #[test]
    fn test_nested_world_is_parent_times_local() {
        let mut scene: Scene<()> = Scene::new();
        let root = scene.root();
        let outer = scene.add_group(root).unwrap();
        let inner = scene.add_group(outer).unwrap();
        for id in [outer, inner] {
            scene.translate(id, Vec3::new(0.3, 0.0, 0.0)).unwrap();
            scene.rotate_z(id, 90.0).unwrap();
        }

        let local = scene.node(inner).unwrap().local_transform();
        let expected = scene.world_transform(outer).unwrap() * local;
        assert_mat_eq(scene.world_transform(inner).unwrap(), expected);

        // Two quarter turns with a 0.3 step each land at (-0.3, 0.3).
        let origin = expected.transform_point3(Vec3::ZERO);
        assert_abs_diff_eq!(origin.x, -0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(origin.y, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let mut scene = lettered_tree();
        // Move B (with E and F) under D, after G.
        let b = NodeId(2);
        let d = NodeId(4);
        scene.reparent(b, d).unwrap();

        assert_eq!(visit_order(&scene), "ACDGBEF");
        assert_eq!(scene.node(b).unwrap().parent(), Some(d));
        assert_eq!(scene.node(NodeId(5)).unwrap().parent(), Some(b));
    }

    #[test]
    fn test_reparent_under_descendant_rejected() {
        let mut scene = lettered_tree();
        let a = NodeId(1);
        let e = NodeId(5);
        assert!(matches!(
            scene.reparent(a, e),
            Err(SceneError::CyclicParent { .. })
        ));
        assert!(matches!(
            scene.reparent(a, a),
            Err(SceneError::CyclicParent { .. })
        ));
        let root = scene.root();
        assert!(matches!(
            scene.reparent(root, a),
            Err(SceneError::CyclicParent { .. })
        ));
        assert_eq!(visit_order(&scene), "ABEFCDG");
    }

    #[test]
    fn test_graft_remaps_back_references() {
        let mut scene = Scene::new();
        let root = scene.root();
        let m = MaterialId::new(100);
        let x = scene.add_node(root, m, Some('X')).unwrap();

        let grafted = scene.graft(x, lettered_tree()).unwrap();

        assert_eq!(visit_order(&scene), "XABEFCDG");
        assert_eq!(scene.node(grafted).unwrap().parent(), Some(x));
        for id in (0..scene.len()).map(NodeId) {
            let node = scene.node(id).unwrap();
            for &child in node.children() {
                assert_eq!(scene.node(child).unwrap().parent(), Some(id));
            }
        }
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut scene: Scene<()> = Scene::new();
        assert!(matches!(
            scene.translate(NodeId(7), Vec3::X),
            Err(SceneError::InvalidNode(NodeId(7)))
        ));
        assert!(scene.add_group(NodeId(3)).is_err());
    }
}
