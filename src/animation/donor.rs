// Channel reading started out from https://whoisryosuke.com/blog/2022/importing-gltf-with-wgpu-and-rust
// You can thank ryosuke for this information.

use std::fmt;
use std::path::Path;

use ahash::AHashMap;
use glam::{Quat, Vec3};
use gltf::animation::util;
use gltf::{buffer::Data, Document, Gltf};
use log::{error, info, warn};

use super::{
  AnimationGroup, CurveKeys, Interpolation, KeyedCurve, Keyframe, TargetProperty, DONOR_FRAME_RATE,
};
use crate::error::LoadError;
use crate::utils::{file_name_from_path, has_extension, morph_target_names, skeleton_name};

/// File extensions a donor container may have.
pub const DONOR_EXTENSIONS: [&str; 2] = ["glb", "gltf"];

///
/// What a donor curve was authored against, classified once at decode time.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DonorTarget {
  /// A joint of one of the donor's skins.
  Bone {
    skeleton: Option<String>,
    name: String,
  },
  /// One morph target of a donor mesh.
  MorphTarget { name: String, mesh: Option<String> },
  /// Any other named node.
  Node { name: String },
  /// Nothing addressable by name. These can never be retargeted.
  Unnamed,
}

impl DonorTarget {
  pub fn name(&self) -> Option<&str> {
    match self {
      DonorTarget::Bone { name, .. } => Some(name),
      DonorTarget::MorphTarget { name, .. } => Some(name),
      DonorTarget::Node { name } => Some(name),
      DonorTarget::Unnamed => None,
    }
  }
}

impl fmt::Display for DonorTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DonorTarget::Bone {
        skeleton: Some(skeleton),
        name,
      } => write!(f, "bone {}/{}", skeleton, name),
      DonorTarget::Bone {
        skeleton: None,
        name,
      } => write!(f, "bone {}", name),
      DonorTarget::MorphTarget { name, .. } => write!(f, "morph {}", name),
      DonorTarget::Node { name } => write!(f, "node {}", name),
      DonorTarget::Unnamed => write!(f, "<unnamed>"),
    }
  }
}

/// A group straight out of a donor file, still bound to the foreign rig.
pub type DonorGroup = AnimationGroup<DonorTarget>;

/// Everything decoded out of one donor container.
#[derive(Debug, Clone)]
pub struct DonorAsset {
  pub file_name: String,
  pub groups: Vec<DonorGroup>,
}

/// How many donor curves went to each kind of target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetCensus {
  pub bone: usize,
  pub morph: usize,
  pub node: usize,
  pub other: usize,
}

impl TargetCensus {
  pub fn of(group: &DonorGroup) -> Self {
    let mut census = TargetCensus::default();
    for targeted in group.targeted_curves() {
      match targeted.target {
        DonorTarget::Bone { .. } => census.bone += 1,
        DonorTarget::MorphTarget { .. } => census.morph += 1,
        DonorTarget::Node { .. } => census.node += 1,
        DonorTarget::Unnamed => census.other += 1,
      }
    }
    census
  }
}

impl DonorAsset {
  ///
  /// Load a donor container from disk. External buffers are resolved next to the file.
  ///
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
    let path = path.as_ref();
    let file_name = file_name_from_path(path);
    let bytes = match std::fs::read(path) {
      Ok(bytes) => bytes,
      Err(source) => {
        return Err(LoadError::Io {
          path: path.display().to_string(),
          source,
        })
      }
    };

    // We need the base path for the GLTF lib so relative buffer uris resolve.
    let base = path.parent().unwrap_or_else(|| Path::new("./"));
    Self::from_slice(&bytes, &file_name, Some(base))
  }

  ///
  /// Decode a donor container from raw bytes.
  ///
  /// Without a base directory only embedded (GLB blob or data uri) buffers can be resolved.
  ///
  pub fn from_slice(bytes: &[u8], file_name: &str, base: Option<&Path>) -> Result<Self, LoadError> {
    let gltf_error = |source| LoadError::Gltf {
      file_name: file_name.to_string(),
      source,
    };

    let Gltf { document, blob } = Gltf::from_slice(bytes).map_err(gltf_error)?;
    let buffers = gltf::import_buffers(&document, base, blob).map_err(gltf_error)?;

    let groups = grab_animations(&document, &buffers, file_name);

    for group in &groups {
      let census = TargetCensus::of(group);
      info!(
        "avatar-retarget: donor group [{}] has [{}] curves. bone={} morph={} node={} other={}",
        group.name,
        group.len(),
        census.bone,
        census.morph,
        census.node,
        census.other
      );
    }

    Ok(DonorAsset {
      file_name: file_name.to_string(),
      groups,
    })
  }

  ///
  /// Whether a dropped file looks like something this loader accepts.
  ///
  pub fn accepts(file_name: &str) -> bool {
    has_extension(file_name, &DONOR_EXTENSIONS)
  }
}

/// Decoded output data of one channel.
enum Keyframes {
  Translation(Vec<Vec3>),
  Rotation(Vec<Quat>),
  Scale(Vec<Vec3>),
  /// Flat, target major within each keyframe.
  Weights(Vec<f32>),
}

///
/// Turn every animation of the document into a donor group.
///
/// A channel that can't be read is dropped with an error log. The rest of its animation survives.
///
pub(crate) fn grab_animations(document: &Document, buffers: &[Data], file_name: &str) -> Vec<DonorGroup> {
  // Which skin each joint belongs to. First skin wins if a joint is shared.
  let mut joint_skins: AHashMap<usize, String> = AHashMap::new();
  for skin in document.skins() {
    for joint in skin.joints() {
      joint_skins
        .entry(joint.index())
        .or_insert_with(|| skeleton_name(&skin));
    }
  }

  let mut groups = vec![];

  for animation in document.animations() {
    let group_name = animation
      .name()
      .map(String::from)
      .unwrap_or_else(|| format!("animation{}", animation.index()));
    let mut group: DonorGroup = AnimationGroup::new(group_name);

    for (channel_index, channel) in animation.channels().enumerate() {
      let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

      let Some(inputs) = reader.read_inputs() else {
        error!(
          "avatar-retarget: No timestamps in channel [{}] of animation [{}] in [{}]. Channel dropped.",
          channel_index, group.name, file_name
        );
        continue;
      };
      let timestamps: Vec<f32> = inputs.collect();

      let keyframes = match reader.read_outputs() {
        Some(util::ReadOutputs::Translations(translations)) => {
          Keyframes::Translation(translations.map(Vec3::from_array).collect())
        }
        Some(util::ReadOutputs::Rotations(rotations)) => {
          Keyframes::Rotation(rotations.into_f32().map(Quat::from_array).collect())
        }
        Some(util::ReadOutputs::Scales(scales)) => Keyframes::Scale(scales.map(Vec3::from_array).collect()),
        Some(util::ReadOutputs::MorphTargetWeights(weights)) => Keyframes::Weights(weights.into_f32().collect()),
        None => {
          error!(
            "avatar-retarget: Unknown keyframes in channel [{}] of animation [{}] in [{}]. Channel dropped.",
            channel_index, group.name, file_name
          );
          continue;
        }
      };

      let node = channel.target().node();
      let interpolation = Interpolation::from(channel.sampler().interpolation());

      match keyframes {
        Keyframes::Weights(weights) => {
          let mesh = node.mesh();
          let target_names = mesh.as_ref().map(morph_target_names).unwrap_or_default();
          let mesh_name = mesh.as_ref().and_then(|mesh| mesh.name()).map(String::from);

          let per_target = split_weights(&weights, timestamps.len(), interpolation);
          if per_target.is_empty() && !weights.is_empty() {
            error!(
              "avatar-retarget: Mismatched morph weight count [{}] for [{}] timestamps in channel [{}] of [{}]. Channel dropped.",
              weights.len(),
              timestamps.len(),
              channel_index,
              file_name
            );
            continue;
          }

          for (target_index, values) in per_target.into_iter().enumerate() {
            let Some(Some(name)) = target_names.get(target_index).cloned() else {
              warn!(
                "avatar-retarget: Morph target [{}] on node [{}] has no name. Skipped.",
                target_index,
                node.name().unwrap_or("<unnamed>")
              );
              continue;
            };
            let Some(keys) = build_keys(&timestamps, &values, interpolation) else {
              continue;
            };
            group.add_targeted_curve(
              KeyedCurve::new(
                format!("{}.influence", name),
                TargetProperty::Influence,
                DONOR_FRAME_RATE,
                interpolation,
                CurveKeys::Scalar(keys),
              ),
              DonorTarget::MorphTarget {
                name,
                mesh: mesh_name.clone(),
              },
            );
          }
        }

        keyframes => {
          let target = match (node.name(), joint_skins.get(&node.index())) {
            (Some(name), Some(skeleton)) => DonorTarget::Bone {
              skeleton: Some(skeleton.clone()),
              name: name.to_string(),
            },
            (Some(name), None) => DonorTarget::Node {
              name: name.to_string(),
            },
            (None, _) => DonorTarget::Unnamed,
          };

          let (property, keys) = match keyframes {
            Keyframes::Translation(values) => (
              TargetProperty::Translation,
              build_keys(&timestamps, &values, interpolation).map(CurveKeys::Vector3),
            ),
            Keyframes::Rotation(values) => (
              TargetProperty::Rotation,
              build_keys(&timestamps, &values, interpolation).map(CurveKeys::Quaternion),
            ),
            Keyframes::Scale(values) => (
              TargetProperty::Scale,
              build_keys(&timestamps, &values, interpolation).map(CurveKeys::Vector3),
            ),
            Keyframes::Weights(_) => continue,
          };

          // * If the channel data does not match the length of timestamp data, it blew up.
          let Some(keys) = keys else {
            error!(
              "avatar-retarget: Mismatched {:?} length in channel [{}] of [{}] for [{}] timestamps. Channel dropped.",
              property,
              channel_index,
              file_name,
              timestamps.len()
            );
            continue;
          };

          let label = target.name().unwrap_or("node").to_string();
          group.add_targeted_curve(
            KeyedCurve::new(
              format!("{}.{}", label, property_label(property)),
              property,
              DONOR_FRAME_RATE,
              interpolation,
              keys,
            ),
            target,
          );
        }
      }
    }

    groups.push(group);
  }

  groups
}

fn property_label(property: TargetProperty) -> &'static str {
  match property {
    TargetProperty::Translation => "translation",
    TargetProperty::Rotation => "rotation",
    TargetProperty::Scale => "scale",
    TargetProperty::Influence => "influence",
  }
}

///
/// Zip timestamps (seconds) with output values into keyframes (frames).
///
/// Cubic spline outputs come as (in tangent, value, out tangent) triplets per timestamp.
/// Returns None when the counts don't line up.
///
fn build_keys<T: Copy>(
  timestamps: &[f32],
  values: &[T],
  interpolation: Interpolation,
) -> Option<Vec<Keyframe<T>>> {
  match interpolation {
    Interpolation::CubicSpline => {
      if values.len() != timestamps.len() * 3 {
        return None;
      }
      Some(
        timestamps
          .iter()
          .zip(values.chunks_exact(3))
          .map(|(time, triplet)| Keyframe {
            frame: time * DONOR_FRAME_RATE,
            value: triplet[1],
            in_tangent: Some(triplet[0]),
            out_tangent: Some(triplet[2]),
          })
          .collect(),
      )
    }
    Interpolation::Linear | Interpolation::Step => {
      if values.len() != timestamps.len() {
        return None;
      }
      Some(
        timestamps
          .iter()
          .zip(values)
          .map(|(time, value)| Keyframe::new(time * DONOR_FRAME_RATE, *value))
          .collect(),
      )
    }
  }
}

///
/// Split a flat morph weight output into one value list per target.
///
/// Each returned list has the layout `build_keys` expects for the interpolation.
/// Empty if the weight count is not a whole multiple of the keyframe count.
///
fn split_weights(weights: &[f32], keyframe_count: usize, interpolation: Interpolation) -> Vec<Vec<f32>> {
  let elements_per_key = match interpolation {
    Interpolation::CubicSpline => 3,
    Interpolation::Linear | Interpolation::Step => 1,
  };
  let stride = keyframe_count * elements_per_key;
  if stride == 0 || weights.len() % stride != 0 {
    return vec![];
  }
  let target_count = weights.len() / stride;

  (0..target_count)
    .map(|target| {
      weights
        .chunks_exact(target_count)
        .map(|element| element[target])
        .collect()
    })
    .collect()
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn linear_keys_convert_seconds_to_frames() {
    let keys = match build_keys(&[0.0, 0.5, 1.0], &[1.0_f32, 2.0, 3.0], Interpolation::Linear) {
      Some(keys) => keys,
      None => panic!("matching counts were rejected"),
    };
    let frames: Vec<f32> = keys.iter().map(|key| key.frame).collect();
    assert_eq!(frames, vec![0.0, 30.0, 60.0]);
    assert!(keys.iter().all(|key| key.in_tangent.is_none()));
  }

  #[test]
  fn cubic_keys_unpack_triplets() {
    let keys = match build_keys(
      &[0.0, 1.0],
      &[-1.0_f32, 10.0, 1.0, -2.0, 20.0, 2.0],
      Interpolation::CubicSpline,
    ) {
      Some(keys) => keys,
      None => panic!("cubic triplets were rejected"),
    };
    assert_eq!(keys[0].value, 10.0);
    assert_eq!(keys[0].in_tangent, Some(-1.0));
    assert_eq!(keys[1].out_tangent, Some(2.0));
  }

  #[test]
  fn mismatched_counts_are_rejected() {
    assert!(build_keys(&[0.0, 1.0], &[1.0_f32], Interpolation::Linear).is_none());
    assert!(build_keys(&[0.0, 1.0], &[1.0_f32, 2.0], Interpolation::CubicSpline).is_none());
  }

  #[test]
  fn weights_split_per_target() {
    // Two keyframes, three targets.
    let weights = [0.0, 0.1, 0.2, 1.0, 1.1, 1.2];
    let split = split_weights(&weights, 2, Interpolation::Linear);
    assert_eq!(split, vec![vec![0.0, 1.0], vec![0.1, 1.1], vec![0.2, 1.2]]);

    // Cubic keeps the triplet layout for each target.
    let weights = [
      -0.5, -0.6, 0.0, 0.1, 0.5, 0.6, // key 0: in tangents, values, out tangents
      -1.5, -1.6, 1.0, 1.1, 1.5, 1.6, // key 1
    ];
    let split = split_weights(&weights, 2, Interpolation::CubicSpline);
    assert_eq!(split[0], vec![-0.5, 0.0, 0.5, -1.5, 1.0, 1.5]);
    assert_eq!(split[1], vec![-0.6, 0.1, 0.6, -1.6, 1.1, 1.6]);

    assert!(split_weights(&[0.0, 1.0, 2.0], 2, Interpolation::Linear).is_empty());
  }

  #[test]
  fn census_counts_every_kind() {
    let mut group: DonorGroup = AnimationGroup::new("mixed");
    let curve = KeyedCurve::new(
      "c",
      TargetProperty::Influence,
      DONOR_FRAME_RATE,
      Interpolation::Linear,
      CurveKeys::Scalar(vec![Keyframe::new(0.0, 0.0), Keyframe::new(1.0, 1.0)]),
    );
    group.add_targeted_curve(
      curve.clone(),
      DonorTarget::Bone {
        skeleton: None,
        name: "Hips".into(),
      },
    );
    group.add_targeted_curve(
      curve.clone(),
      DonorTarget::MorphTarget {
        name: "jawOpen".into(),
        mesh: None,
      },
    );
    group.add_targeted_curve(curve.clone(), DonorTarget::Node { name: "Prop".into() });
    group.add_targeted_curve(curve, DonorTarget::Unnamed);

    assert_eq!(
      TargetCensus::of(&group),
      TargetCensus {
        bone: 1,
        morph: 1,
        node: 1,
        other: 1
      }
    );
  }

  #[test]
  fn accepts_gltf_family_only() {
    assert!(DonorAsset::accepts("Walk.GLB"));
    assert!(DonorAsset::accepts("walk.gltf"));
    assert!(!DonorAsset::accepts("walk.fbx"));
    assert!(!DonorAsset::accepts("face.json"));
  }
}
