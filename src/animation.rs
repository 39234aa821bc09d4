/// Decodes donor animation groups out of glTF containers.
pub mod donor;

use std::cmp::Ordering;

use glam::{Quat, Vec3};
use log::debug;

use crate::error::{DisposalError, PlaybackError};
use crate::scene::{BoneId, MorphTargetId, NodeId};

/// Frame rate donor glTF seconds get converted at.
pub const DONOR_FRAME_RATE: f32 = 60.0;

/// Which property of the target a curve drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetProperty {
  Translation,
  Rotation,
  Scale,
  /// Morph target weight.
  Influence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
  #[default]
  Linear,
  Step,
  CubicSpline,
}

impl From<gltf::animation::Interpolation> for Interpolation {
  fn from(interpolation: gltf::animation::Interpolation) -> Self {
    match interpolation {
      gltf::animation::Interpolation::Linear => Interpolation::Linear,
      gltf::animation::Interpolation::Step => Interpolation::Step,
      gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
    }
  }
}

/// A single sample. Tangents only exist on cubic spline curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe<T> {
  pub frame: f32,
  pub value: T,
  pub in_tangent: Option<T>,
  pub out_tangent: Option<T>,
}

impl<T> Keyframe<T> {
  pub fn new(frame: f32, value: T) -> Self {
    Keyframe {
      frame,
      value,
      in_tangent: None,
      out_tangent: None,
    }
  }
}

/// Raw keyframe data. Unionized.
#[derive(Debug, Clone, PartialEq)]
pub enum CurveKeys {
  /// Morph influences and other single float channels.
  Scalar(Vec<Keyframe<f32>>),
  /// Translation and scale.
  Vector3(Vec<Keyframe<Vec3>>),
  /// Rotation.
  Quaternion(Vec<Keyframe<Quat>>),
}

impl CurveKeys {
  pub fn len(&self) -> usize {
    match self {
      CurveKeys::Scalar(keys) => keys.len(),
      CurveKeys::Vector3(keys) => keys.len(),
      CurveKeys::Quaternion(keys) => keys.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn frames(&self) -> Vec<f32> {
    match self {
      CurveKeys::Scalar(keys) => keys.iter().map(|key| key.frame).collect(),
      CurveKeys::Vector3(keys) => keys.iter().map(|key| key.frame).collect(),
      CurveKeys::Quaternion(keys) => keys.iter().map(|key| key.frame).collect(),
    }
  }

  fn sort_by_frame(&mut self) {
    // Stable, so equal frames keep their authored order.
    let by_frame = |a: f32, b: f32| a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match self {
      CurveKeys::Scalar(keys) => keys.sort_by(|a, b| by_frame(a.frame, b.frame)),
      CurveKeys::Vector3(keys) => keys.sort_by(|a, b| by_frame(a.frame, b.frame)),
      CurveKeys::Quaternion(keys) => keys.sort_by(|a, b| by_frame(a.frame, b.frame)),
    }
  }
}

///
/// Keyed samples for one channel of one target.
///
/// Keys are always sorted by frame once the curve exists.
///
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedCurve {
  pub name: String,
  pub property: TargetProperty,
  pub frame_rate: f32,
  pub interpolation: Interpolation,
  keys: CurveKeys,
}

impl KeyedCurve {
  pub fn new(
    name: impl Into<String>,
    property: TargetProperty,
    frame_rate: f32,
    interpolation: Interpolation,
    mut keys: CurveKeys,
  ) -> Self {
    keys.sort_by_frame();
    KeyedCurve {
      name: name.into(),
      property,
      frame_rate,
      interpolation,
      keys,
    }
  }

  pub fn keys(&self) -> &CurveKeys {
    &self.keys
  }

  /// Anything under two samples can't actually animate.
  pub fn is_playable(&self) -> bool {
    self.keys.len() >= 2
  }

  ///
  /// A 3 component position channel. These are the only ones affected by rig scaling.
  ///
  pub fn is_positional(&self) -> bool {
    self.property == TargetProperty::Translation && matches!(self.keys, CurveKeys::Vector3(_))
  }

  pub fn first_frame(&self) -> Option<f32> {
    self.keys.frames().first().copied()
  }

  pub fn last_frame(&self) -> Option<f32> {
    self.keys.frames().last().copied()
  }

  ///
  /// Copy of this curve with every position value multiplied by the multiplier.
  ///
  /// Tangents and interpolation are carried over untouched. Non positional curves come back as an exact copy.
  ///
  pub fn scaled(&self, multiplier: f32) -> KeyedCurve {
    let mut scaled = self.clone();
    if !self.is_positional() {
      return scaled;
    }
    if let CurveKeys::Vector3(keys) = &mut scaled.keys {
      for key in keys {
        key.value *= multiplier;
      }
    }
    scaled
  }
}

/// What a resident curve is bound to on the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RigTarget {
  Bone(BoneId),
  MorphTarget(MorphTargetId),
  Node(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetedCurve<T> {
  pub curve: KeyedCurve,
  pub target: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
  #[default]
  Stopped,
  Playing,
  Released,
}

///
/// An ordered set of curves bound to targets, plus group level playback parameters.
///
/// `T` is [`donor::DonorTarget`] for groups fresh out of a donor file and
/// [`RigTarget`] once bound to the avatar.
///
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationGroup<T> {
  pub name: String,
  pub looping: bool,
  pub speed_ratio: f32,
  targeted_curves: Vec<TargetedCurve<T>>,
  state: PlaybackState,
}

/// A group bound to the avatar's own rig.
pub type ResidentGroup = AnimationGroup<RigTarget>;

impl<T> AnimationGroup<T> {
  pub fn new(name: impl Into<String>) -> Self {
    AnimationGroup {
      name: name.into(),
      looping: false,
      speed_ratio: 1.0,
      targeted_curves: vec![],
      state: PlaybackState::Stopped,
    }
  }

  pub fn add_targeted_curve(&mut self, curve: KeyedCurve, target: T) {
    self.targeted_curves.push(TargetedCurve { curve, target });
  }

  pub fn targeted_curves(&self) -> &[TargetedCurve<T>] {
    &self.targeted_curves
  }

  pub fn len(&self) -> usize {
    self.targeted_curves.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targeted_curves.is_empty()
  }

  pub fn state(&self) -> PlaybackState {
    self.state
  }

  pub fn is_playing(&self) -> bool {
    self.state == PlaybackState::Playing
  }

  ///
  /// Frame range covered by every curve in the group. None if the group is empty.
  ///
  pub fn frame_range(&self) -> Option<(f32, f32)> {
    self
      .targeted_curves
      .iter()
      .filter_map(|targeted| Some((targeted.curve.first_frame()?, targeted.curve.last_frame()?)))
      .reduce(|(from, to), (first, last)| (from.min(first), to.max(last)))
  }

  ///
  /// Start playing with the given loop flag and speed ratio.
  ///
  pub fn start(&mut self, looping: bool, speed_ratio: f32) -> Result<(), PlaybackError> {
    self.ensure_not_released()?;
    self.looping = looping;
    self.speed_ratio = speed_ratio;
    self.state = PlaybackState::Playing;
    debug!("avatar-retarget: started group [{}].", self.name);
    Ok(())
  }

  ///
  /// Play with the group's current speed ratio.
  ///
  pub fn play(&mut self, looping: bool) -> Result<(), PlaybackError> {
    self.start(looping, self.speed_ratio)
  }

  pub fn stop(&mut self) -> Result<(), PlaybackError> {
    self.ensure_not_released()?;
    self.state = PlaybackState::Stopped;
    Ok(())
  }

  ///
  /// Drop every curve and mark the group dead. Nothing works on it afterwards.
  ///
  pub fn release(&mut self) -> Result<(), PlaybackError> {
    self.ensure_not_released()?;
    self.targeted_curves.clear();
    self.state = PlaybackState::Released;
    debug!("avatar-retarget: released group [{}].", self.name);
    Ok(())
  }

  fn ensure_not_released(&self) -> Result<(), PlaybackError> {
    if self.state == PlaybackState::Released {
      return Err(PlaybackError::Released(self.name.clone()));
    }
    Ok(())
  }
}

///
/// Stop and release every group, attempting both on each even if one fails.
///
/// Failures are gathered into one diagnostic instead of aborting halfway.
///
pub fn stop_and_release<'a, T: 'a>(
  groups: impl IntoIterator<Item = &'a mut AnimationGroup<T>>,
) -> Result<(), DisposalError> {
  let mut failures = vec![];
  for group in groups {
    if let Err(e) = group.stop() {
      failures.push(e);
    }
    if let Err(e) = group.release() {
      failures.push(e);
    }
  }

  if failures.is_empty() {
    Ok(())
  } else {
    Err(DisposalError { failures })
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //

#[cfg(test)]
mod tests {
  use super::*;
  use float_cmp::approx_eq;

  fn position_curve() -> KeyedCurve {
    KeyedCurve::new(
      "hips_position",
      TargetProperty::Translation,
      DONOR_FRAME_RATE,
      Interpolation::CubicSpline,
      CurveKeys::Vector3(vec![
        Keyframe {
          frame: 30.0,
          value: Vec3::new(0.5, 1.0, -2.0),
          in_tangent: Some(Vec3::ONE),
          out_tangent: Some(Vec3::ONE),
        },
        Keyframe {
          frame: 0.0,
          value: Vec3::new(1.0, 2.0, 3.0),
          in_tangent: Some(Vec3::Z),
          out_tangent: Some(Vec3::X),
        },
      ]),
    )
  }

  #[test]
  fn keys_are_sorted_on_creation() {
    let curve = position_curve();
    assert_eq!(curve.keys().frames(), vec![0.0, 30.0]);
    assert_eq!(curve.first_frame(), Some(0.0));
    assert_eq!(curve.last_frame(), Some(30.0));
  }

  #[test]
  fn scaling_touches_values_only() {
    let curve = position_curve();
    let scaled = curve.scaled(2.0);

    let CurveKeys::Vector3(keys) = scaled.keys() else {
      panic!("scaling changed the key type");
    };
    assert!(approx_eq!(f32, keys[0].value.x, 2.0, ulps = 2));
    assert!(approx_eq!(f32, keys[0].value.y, 4.0, ulps = 2));
    assert!(approx_eq!(f32, keys[0].value.z, 6.0, ulps = 2));
    assert_eq!(keys[0].in_tangent, Some(Vec3::Z));
    assert_eq!(keys[0].out_tangent, Some(Vec3::X));
    assert_eq!(scaled.interpolation, Interpolation::CubicSpline);
  }

  #[test]
  fn scaling_leaves_rotations_alone() {
    let rotation = KeyedCurve::new(
      "spine_rotation",
      TargetProperty::Rotation,
      DONOR_FRAME_RATE,
      Interpolation::Linear,
      CurveKeys::Quaternion(vec![
        Keyframe::new(0.0, Quat::IDENTITY),
        Keyframe::new(10.0, Quat::from_rotation_y(1.0)),
      ]),
    );
    assert_eq!(rotation.scaled(3.0), rotation);

    let scale = KeyedCurve::new(
      "spine_scale",
      TargetProperty::Scale,
      DONOR_FRAME_RATE,
      Interpolation::Linear,
      CurveKeys::Vector3(vec![Keyframe::new(0.0, Vec3::ONE), Keyframe::new(1.0, Vec3::ONE)]),
    );
    assert!(!scale.is_positional());
    assert_eq!(scale.scaled(3.0), scale);
  }

  #[test]
  fn released_groups_refuse_everything() {
    let mut group: ResidentGroup = AnimationGroup::new("walk_retarget");
    group.add_targeted_curve(position_curve(), RigTarget::Node(NodeId(1)));

    assert!(group.play(true).is_ok());
    assert!(group.is_playing());
    assert!(group.release().is_ok());
    assert!(group.is_empty());
    assert_eq!(group.state(), PlaybackState::Released);

    assert_eq!(group.stop(), Err(PlaybackError::Released("walk_retarget".into())));
    assert!(group.play(true).is_err());
  }

  #[test]
  fn disposal_attempts_both_steps_and_aggregates() {
    let mut fresh: ResidentGroup = AnimationGroup::new("fresh");
    let mut dead: ResidentGroup = AnimationGroup::new("dead");
    assert!(dead.release().is_ok());

    let result = stop_and_release([&mut dead, &mut fresh]);

    // The dead group fails on both steps, the fresh one still gets released.
    match result {
      Err(e) => assert_eq!(e.failures.len(), 2),
      Ok(()) => panic!("disposing a released group should report failures"),
    }
    assert_eq!(fresh.state(), PlaybackState::Released);
  }

  #[test]
  fn frame_range_spans_all_curves() {
    let mut group: ResidentGroup = AnimationGroup::new("range");
    assert_eq!(group.frame_range(), None);
    group.add_targeted_curve(position_curve(), RigTarget::Node(NodeId(0)));
    group.add_targeted_curve(
      KeyedCurve::new(
        "late",
        TargetProperty::Influence,
        30.0,
        Interpolation::Linear,
        CurveKeys::Scalar(vec![Keyframe::new(10.0, 0.0), Keyframe::new(90.0, 1.0)]),
      ),
      RigTarget::MorphTarget(MorphTargetId(0)),
    );
    assert_eq!(group.frame_range(), Some((0.0, 90.0)));
  }
}
