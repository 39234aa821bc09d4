use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use glam::Mat4;
use gltf::scene::Transform;
use log::warn;
use serde::Deserialize;

use crate::error::LoadError;

pub fn transform_to_matrix(transform: Transform) -> Mat4 {
  let tr = transform.matrix();
  Mat4::from_cols_array(&[
    tr[0][0], tr[0][1], tr[0][2], tr[0][3], tr[1][0], tr[1][1], tr[1][2], tr[1][3], tr[2][0],
    tr[2][1], tr[2][2], tr[2][3], tr[3][0], tr[3][1], tr[3][2], tr[3][3],
  ])
}

/// Exporters (Blender, three.js, Babylon) put morph target names here.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MeshExtras {
  #[serde(default)]
  target_names: Vec<String>,
}

///
/// Get the morph target names of a glTF mesh, one entry per target.
///
/// glTF has no native slot for these, so they come out of `extras.targetNames`.
/// Targets without a name are None.
///
pub(crate) fn morph_target_names(mesh: &gltf::Mesh) -> Vec<Option<String>> {
  let extras = match mesh.extras() {
    Some(raw) => match serde_json::from_str::<MeshExtras>(raw.get()) {
      Ok(extras) => extras,
      Err(e) => {
        warn!(
          "avatar-retarget: ignoring malformed extras on mesh [{}]. {}",
          mesh.name().unwrap_or("<unnamed>"),
          e
        );
        MeshExtras::default()
      }
    },
    None => MeshExtras::default(),
  };

  // Every primitive is supposed to carry the same amount of targets. Take the widest one anyways.
  let target_count = mesh
    .primitives()
    .map(|primitive| primitive.morph_targets().count())
    .max()
    .unwrap_or(0)
    .max(mesh.weights().map_or(0, |weights| weights.len()));

  (0..target_count)
    .map(|index| extras.target_names.get(index).cloned())
    .collect()
}

///
/// Name of the skeleton a skin turns into. Unnamed skins get `skeleton{index}`.
///
/// Avatar and donor skins share this naming.
///
pub(crate) fn skeleton_name(skin: &gltf::Skin) -> String {
  skin
    .name()
    .map(String::from)
    .unwrap_or_else(|| format!("skeleton{}", skin.index()))
}

///
/// Automatically parse a file path into a BufReader<File>.
///
pub(crate) fn read_path_to_buf_read(path: &Path) -> Result<BufReader<File>, LoadError> {
  match File::open(path) {
    Ok(file) => Ok(BufReader::new(file)),
    Err(source) => Err(LoadError::Io {
      path: path.display().to_string(),
      source,
    }),
  }
}

///
/// Get a file name from the path provided. Falls back to the whole path if there is none.
///
pub(crate) fn file_name_from_path(path: &Path) -> String {
  match path.file_name() {
    Some(os_str) => os_str.to_string_lossy().into_owned(),
    None => path.display().to_string(),
  }
}

///
/// Case-insensitive check of a file name against a list of extensions (without the dot).
///
pub(crate) fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
  match Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
    Some(ext) => extensions
      .iter()
      .any(|accepted| ext.eq_ignore_ascii_case(accepted)),
    None => false,
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extension_check_ignores_case() {
    assert!(has_extension("walk.GLB", &["glb", "gltf"]));
    assert!(has_extension("dir/walk.gltf", &["glb", "gltf"]));
    assert!(has_extension("face.Json", &["json"]));
    assert!(!has_extension("face.json.txt", &["json"]));
    assert!(!has_extension("json", &["json"]));
  }

  #[test]
  fn file_name_is_last_component() {
    assert_eq!(file_name_from_path(Path::new("a/b/walk.glb")), "walk.glb");
  }
}
