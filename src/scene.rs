/// Decodes an avatar scene graph out of a glTF 2.0 document.
pub mod avatar;

use glam::Mat4;

/// Index of a node inside a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a skeleton inside a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkeletonId(pub usize);

/// A bone is addressed through the skeleton that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoneId {
  pub skeleton: SkeletonId,
  pub bone: usize,
}

/// Index of a morph target inside a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MorphTargetId(pub usize);

/// A named, positioned element of the avatar hierarchy.
#[derive(Debug, Clone)]
pub struct SceneNode {
  pub name: Option<String>,
  /// Local transform relative to the parent.
  pub transform: Mat4,
  pub parent: Option<NodeId>,
  pub children: Vec<NodeId>,
  pub mesh: Option<MeshData>,
}

/// The parts of a mesh the retargeting engine cares about.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
  pub name: Option<String>,
  pub skeleton: Option<SkeletonId>,
  /// Morph targets owned by this mesh, in declaration order.
  pub morph_targets: Vec<MorphTargetId>,
}

#[derive(Debug, Clone)]
pub struct Bone {
  pub name: Option<String>,
  /// The scene node this joint drives.
  pub linked_node: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Skeleton {
  pub name: String,
  pub bones: Vec<Bone>,
}

#[derive(Debug, Clone)]
pub struct MorphTarget {
  pub name: Option<String>,
  /// The node whose mesh owns this target.
  pub owner: NodeId,
  /// Current influence, 0.0 to 1.0.
  pub influence: f32,
}

///
/// Arena holding the avatar hierarchy.
///
/// Everything is addressed by index, so lookup tables built on top of it
/// can be thrown away and rebuilt without touching the graph.
///
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
  nodes: Vec<SceneNode>,
  skeletons: Vec<Skeleton>,
  morph_targets: Vec<MorphTarget>,
}

impl SceneGraph {
  pub fn new() -> Self {
    Self::default()
  }

  ///
  /// Add a node. If a parent is given the node is appended to its children.
  ///
  pub fn add_node(&mut self, name: Option<&str>, parent: Option<NodeId>) -> NodeId {
    self.add_node_with_transform(name, parent, Mat4::IDENTITY)
  }

  pub fn add_node_with_transform(
    &mut self,
    name: Option<&str>,
    parent: Option<NodeId>,
    transform: Mat4,
  ) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.push(SceneNode {
      name: name.map(String::from),
      transform,
      parent,
      children: vec![],
      mesh: None,
    });
    if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(parent.0)) {
      parent.children.push(id);
    }
    id
  }

  ///
  /// Add a skeleton. Every bone is given as (name, node it drives).
  ///
  pub fn add_skeleton(&mut self, name: &str, bones: &[(Option<&str>, Option<NodeId>)]) -> SkeletonId {
    let id = SkeletonId(self.skeletons.len());
    self.skeletons.push(Skeleton {
      name: name.to_string(),
      bones: bones
        .iter()
        .map(|(bone_name, linked_node)| Bone {
          name: bone_name.map(String::from),
          linked_node: *linked_node,
        })
        .collect(),
    });
    id
  }

  ///
  /// Turn a node into a mesh. Each morph target name becomes a fresh morph target owned by it.
  ///
  /// Attaching twice replaces the previous mesh data but keeps the old morph targets in the arena.
  ///
  pub fn attach_mesh(
    &mut self,
    node: NodeId,
    mesh_name: Option<&str>,
    skeleton: Option<SkeletonId>,
    morph_target_names: &[Option<&str>],
  ) -> Vec<MorphTargetId> {
    let mut ids = Vec::with_capacity(morph_target_names.len());
    for target_name in morph_target_names {
      let id = MorphTargetId(self.morph_targets.len());
      self.morph_targets.push(MorphTarget {
        name: target_name.map(String::from),
        owner: node,
        influence: 0.0,
      });
      ids.push(id);
    }

    if let Some(scene_node) = self.nodes.get_mut(node.0) {
      scene_node.mesh = Some(MeshData {
        name: mesh_name.map(String::from),
        skeleton,
        morph_targets: ids.clone(),
      });
    }
    ids
  }

  pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
    self.nodes.get(id.0)
  }

  pub fn skeleton(&self, id: SkeletonId) -> Option<&Skeleton> {
    self.skeletons.get(id.0)
  }

  pub fn bone(&self, id: BoneId) -> Option<&Bone> {
    self.skeleton(id.skeleton)?.bones.get(id.bone)
  }

  pub fn morph_target(&self, id: MorphTargetId) -> Option<&MorphTarget> {
    self.morph_targets.get(id.0)
  }

  pub fn morph_target_mut(&mut self, id: MorphTargetId) -> Option<&mut MorphTarget> {
    self.morph_targets.get_mut(id.0)
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
    self
      .nodes
      .iter()
      .enumerate()
      .map(|(index, node)| (NodeId(index), node))
  }

  ///
  /// Pre-order walk of the subtree under root, root included.
  ///
  /// Uses an explicit stack so deep hierarchies can't blow the call stack.
  ///
  pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
    let mut visited = vec![];
    let mut stack = vec![root];

    while let Some(current) = stack.pop() {
      let Some(node) = self.node(current) else {
        continue;
      };
      visited.push(current);
      // Reversed so the first child is popped first.
      stack.extend(node.children.iter().rev().copied());
    }

    visited
  }

  ///
  /// World transform of a node, accumulated from the root down.
  ///
  pub fn world_transform(&self, id: NodeId) -> Mat4 {
    let mut transform = Mat4::IDENTITY;
    let mut current = Some(id);
    // Parent links are acyclic as long as nodes are only created through add_node.
    while let Some(node) = current.and_then(|current| self.node(current)) {
      transform = node.transform * transform;
      current = node.parent;
    }
    transform
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
