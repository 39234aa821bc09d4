use std::path::Path;

use ahash::AHashMap;
use gltf::{Document, Gltf};
use log::{info, warn};

use super::{NodeId, SceneGraph, SkeletonId};
use crate::error::LoadError;
use crate::utils::{
  file_name_from_path, morph_target_names, read_path_to_buf_read, skeleton_name, transform_to_matrix,
};

/// Name of the synthetic node every glTF scene root gets parented to.
pub const AVATAR_ROOT_NAME: &str = "__root__";

///
/// A loaded avatar: its scene graph and the node the whole thing hangs off.
///
#[derive(Debug, Clone)]
pub struct Avatar {
  pub name: String,
  pub scene: SceneGraph,
  pub root: NodeId,
}

impl Avatar {
  ///
  /// Load an avatar from a `.gltf` or `.glb` file.
  ///
  /// Only the document is needed: names, hierarchy, skins and morph target counts.
  /// Buffers are never touched.
  ///
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
    let path = path.as_ref();
    let file_name = file_name_from_path(path);
    let reader = read_path_to_buf_read(path)?;

    let gltf_data = match Gltf::from_reader(reader) {
      Ok(gltf_data) => gltf_data,
      Err(source) => return Err(LoadError::Gltf { file_name, source }),
    };

    Ok(Self::from_document(&gltf_data.document, &file_name))
  }

  ///
  /// Load an avatar from the raw bytes of a `.gltf` or `.glb` file.
  ///
  pub fn from_slice(bytes: &[u8], file_name: &str) -> Result<Self, LoadError> {
    match Gltf::from_slice(bytes) {
      Ok(gltf_data) => Ok(Self::from_document(&gltf_data.document, file_name)),
      Err(source) => Err(LoadError::Gltf {
        file_name: file_name.to_string(),
        source,
      }),
    }
  }

  ///
  /// Convert a glTF document into an avatar.
  ///
  /// The default scene is used, or the first one if there is no default.
  /// A document without scenes gives an avatar with a lone root node.
  ///
  pub fn from_document(document: &Document, file_name: &str) -> Self {
    let mut scene = SceneGraph::new();
    let root = scene.add_node(Some(AVATAR_ROOT_NAME), None);

    // gltf node index -> our node.
    let mut node_ids: AHashMap<usize, NodeId> = AHashMap::new();

    match document.default_scene().or_else(|| document.scenes().next()) {
      Some(gltf_scene) => {
        for node in gltf_scene.nodes() {
          read_node(&node, root, &mut scene, &mut node_ids);
        }
      }
      None => warn!("avatar-retarget: [{}] contains no scenes.", file_name),
    }

    // Skins become skeletons. Joints outside the chosen scene simply have no linked node.
    let mut skeleton_ids: AHashMap<usize, SkeletonId> = AHashMap::new();
    for skin in document.skins() {
      let name = skeleton_name(&skin);

      let bones: Vec<(Option<&str>, Option<NodeId>)> = skin
        .joints()
        .map(|joint| (joint.name(), node_ids.get(&joint.index()).copied()))
        .collect();

      let id = scene.add_skeleton(&name, &bones);
      skeleton_ids.insert(skin.index(), id);
    }

    // Now the meshes, with their skeleton and morph targets.
    for node in document.nodes() {
      let (Some(mesh), Some(node_id)) = (node.mesh(), node_ids.get(&node.index()).copied()) else {
        continue;
      };
      let skeleton = node
        .skin()
        .and_then(|skin| skeleton_ids.get(&skin.index()).copied());
      let target_names = morph_target_names(&mesh);
      let target_names: Vec<Option<&str>> = target_names.iter().map(|name| name.as_deref()).collect();

      scene.attach_mesh(node_id, mesh.name(), skeleton, &target_names);
    }

    info!(
      "avatar-retarget: avatar [{}] loaded. [{}] nodes, [{}] skins.",
      file_name,
      scene.node_count(),
      skeleton_ids.len()
    );

    Avatar {
      name: file_name.to_string(),
      scene,
      root,
    }
  }
}

///
/// Copy one glTF node and everything under it into the scene graph.
///
fn read_node(
  node: &gltf::Node,
  parent: NodeId,
  scene: &mut SceneGraph,
  node_ids: &mut AHashMap<usize, NodeId>,
) {
  // Explicit stack, rigs can get deep.
  let mut stack = vec![(node.clone(), parent)];

  while let Some((current, parent)) = stack.pop() {
    if node_ids.contains_key(&current.index()) {
      continue;
    }
    let id =
      scene.add_node_with_transform(current.name(), Some(parent), transform_to_matrix(current.transform()));
    node_ids.insert(current.index(), id);

    let children: Vec<gltf::Node> = current.children().collect();
    stack.extend(children.into_iter().rev().map(|child| (child, id)));
  }
}
