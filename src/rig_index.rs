use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use log::{debug, info};

use crate::alias_table::AliasTable;
use crate::scene::{BoneId, MorphTargetId, NodeId, SceneGraph};

///
/// Name lookup tables for one loaded avatar.
///
/// Built once per avatar load and never mutated afterwards. Reload the avatar, rebuild the index.
///
#[derive(Debug, Clone, Default)]
pub struct RigIndex {
  nodes: AHashMap<String, NodeId>,
  bones: AHashMap<String, BoneId>,
  // Lowercase name -> every morph target with that name, across all meshes.
  morph_targets: AHashMap<String, Vec<MorphTargetId>>,
  morph_meshes: Vec<MorphMeshSummary>,
}

/// How many morph targets one mesh carries, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MorphMeshSummary {
  pub mesh: String,
  pub target_count: usize,
  pub target_names: Vec<String>,
}

impl RigIndex {
  ///
  /// Walk the subtree under root and index every named node, bone and morph target.
  ///
  /// Nodes sharing a name: the last one walked wins.
  /// Bones are keyed both as `skeleton/bone` and as bare `bone`. The bare key is
  /// last-write-wins when several skeletons share a bone name.
  ///
  pub fn build(scene: &SceneGraph, root: NodeId) -> Self {
    let mut index = RigIndex::default();
    let subtree = scene.descendants(root);

    for &id in &subtree {
      if let Some(name) = scene.node(id).and_then(|node| node.name.as_deref()) {
        index.nodes.insert(name.to_string(), id);
      }
    }

    let meshes: Vec<_> = subtree
      .iter()
      .filter_map(|&id| Some((id, scene.node(id)?.mesh.as_ref()?)))
      .collect();

    // Every skeleton referenced by a mesh in the subtree, once.
    let skeletons = meshes
      .iter()
      .filter_map(|(_, mesh)| mesh.skeleton)
      .unique();

    for skeleton_id in skeletons {
      let Some(skeleton) = scene.skeleton(skeleton_id) else {
        continue;
      };
      for (bone_index, bone) in skeleton.bones.iter().enumerate() {
        let Some(bone_name) = bone.name.as_deref() else {
          continue;
        };
        let id = BoneId {
          skeleton: skeleton_id,
          bone: bone_index,
        };
        index
          .bones
          .insert(format!("{}/{}", skeleton.name, bone_name), id);
        index.bones.insert(bone_name.to_string(), id);
      }
    }

    for (node_id, mesh) in &meshes {
      if mesh.morph_targets.is_empty() {
        continue;
      }
      let mut target_names = vec![];
      for &target_id in &mesh.morph_targets {
        let Some(name) = scene
          .morph_target(target_id)
          .and_then(|target| target.name.as_deref())
        else {
          continue;
        };
        index
          .morph_targets
          .entry(name.to_lowercase())
          .or_default()
          .push(target_id);
        target_names.push(name.to_string());
      }

      let mesh_name = mesh
        .name
        .clone()
        .or_else(|| scene.node(*node_id).and_then(|node| node.name.clone()))
        .unwrap_or_else(|| format!("node{}", node_id.0));
      index.morph_meshes.push(MorphMeshSummary {
        mesh: mesh_name,
        target_count: mesh.morph_targets.len(),
        target_names,
      });
    }

    index
  }

  ///
  /// Find an avatar bone. `skeleton/bone` first, then the bare bone name.
  ///
  pub fn resolve_bone(&self, skeleton: Option<&str>, bone: &str) -> Option<BoneId> {
    skeleton
      .and_then(|skeleton| self.bones.get(&format!("{}/{}", skeleton, bone)))
      .or_else(|| self.bones.get(bone))
      .copied()
  }

  pub fn resolve_node(&self, name: &str) -> Option<NodeId> {
    self.nodes.get(name).copied()
  }

  ///
  /// Every morph target registered under this name, case-insensitive.
  ///
  pub fn morph_targets(&self, name: &str) -> &[MorphTargetId] {
    self
      .morph_targets
      .get(&name.to_lowercase())
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  ///
  /// Resolve a source curve name through the alias table and collect every morph
  /// target any of the candidate names reaches.
  ///
  /// Deduplicated, first reached first.
  ///
  pub fn resolve_morph_fanout(&self, source_name: &str, aliases: &AliasTable) -> Vec<MorphTargetId> {
    let mut seen = AHashSet::new();
    aliases
      .resolve(source_name)
      .iter()
      .flat_map(|candidate| self.morph_targets(candidate).iter().copied())
      .filter(|id| seen.insert(*id))
      .collect()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  /// Number of bone keys, both styles counted.
  pub fn bone_key_count(&self) -> usize {
    self.bones.len()
  }

  /// Number of distinct (lowercase) morph target names.
  pub fn morph_name_count(&self) -> usize {
    self.morph_targets.len()
  }

  pub fn morph_meshes(&self) -> &[MorphMeshSummary] {
    &self.morph_meshes
  }

  ///
  /// Dump what got indexed. Handy when a mapping doesn't match anything.
  ///
  pub fn log_summary(&self) {
    let total_targets: usize = self
      .morph_meshes
      .iter()
      .map(|mesh| mesh.target_count)
      .sum();
    info!(
      "avatar-retarget: rig indexed. nodes={} bone_keys={} morph_names={} morph_meshes={} morph_targets={}",
      self.node_count(),
      self.bone_key_count(),
      self.morph_name_count(),
      self.morph_meshes.len(),
      total_targets
    );
    for mesh in self.morph_meshes.iter().take(10) {
      debug!(
        "avatar-retarget: mesh [{}] targets={} {:?}",
        mesh.mesh,
        mesh.target_count,
        mesh.target_names.iter().take(20).collect_vec()
      );
    }
    debug!(
      "avatar-retarget: morph name sample {:?}",
      self.morph_targets.keys().sorted().take(30).collect_vec()
    );
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
