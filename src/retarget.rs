use std::fmt;

use float_cmp::approx_eq;
use log::{debug, info};

use crate::alias_table::AliasTable;
use crate::animation::donor::{DonorGroup, DonorTarget};
use crate::animation::{AnimationGroup, KeyedCurve, ResidentGroup, RigTarget};
use crate::rig_index::RigIndex;

/// How many dropped curve names a report keeps around.
const DROPPED_SAMPLE_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetargetOptions {
  /// Uniform multiplier for position curves. 1.0 leaves them alone.
  pub scale_multiplier: f32,
  /// Overrides the donor speed ratio when set.
  pub speed_ratio: Option<f32>,
}

impl Default for RetargetOptions {
  fn default() -> Self {
    RetargetOptions {
      scale_multiplier: 1.0,
      speed_ratio: None,
    }
  }
}

/// Per target kind tally of one retarget pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetargetReport {
  pub bones_matched: usize,
  pub bones_dropped: usize,
  /// Curves bound to avatar morph targets. One donor curve can fan out into several.
  pub morphs_matched: usize,
  /// Donor morph curves that reached at least one avatar morph target.
  pub morph_curves_matched: usize,
  pub morphs_dropped: usize,
  pub nodes_matched: usize,
  pub nodes_dropped: usize,
  pub unnamed_dropped: usize,
  pub scaled_curves: usize,
  /// The first few dropped curves, as `curve -> target`.
  pub dropped_sample: Vec<String>,
}

impl RetargetReport {
  pub fn dropped(&self) -> usize {
    self.bones_dropped + self.morphs_dropped + self.nodes_dropped + self.unnamed_dropped
  }

  fn record_drop(&mut self, curve: &KeyedCurve, target: &DonorTarget) {
    if self.dropped_sample.len() < DROPPED_SAMPLE_LIMIT {
      self
        .dropped_sample
        .push(format!("{} -> {}", curve.name, target));
    }
  }
}

/// A donor group re-bound onto the avatar.
#[derive(Debug, Clone)]
pub struct Retargeted {
  pub group: ResidentGroup,
  pub report: RetargetReport,
}

///
/// Re-bind every curve of a donor group onto the avatar's own bones, morph targets and nodes.
///
/// This is purely structural: rotations are copied as they are, nothing gets re-solved.
/// Curves whose target can't be found are left out of the result, they never fail the
/// whole group. The result always loops.
///
pub fn retarget(
  donor: &DonorGroup,
  rig: &RigIndex,
  aliases: &AliasTable,
  options: &RetargetOptions,
) -> Retargeted {
  let mut group: ResidentGroup = AnimationGroup::new(format!("{}_retarget", donor.name));
  let mut report = RetargetReport::default();
  let scaling = !approx_eq!(f32, options.scale_multiplier, 1.0, ulps = 2);

  for targeted in donor.targeted_curves() {
    let curve = &targeted.curve;

    match &targeted.target {
      DonorTarget::Bone { skeleton, name } => match rig.resolve_bone(skeleton.as_deref(), name) {
        Some(bone) => {
          bind(&mut group, &mut report, curve, RigTarget::Bone(bone), scaling, options);
          report.bones_matched += 1;
        }
        None => {
          report.bones_dropped += 1;
          report.record_drop(curve, &targeted.target);
        }
      },

      DonorTarget::MorphTarget { name, .. } => {
        let targets = rig.resolve_morph_fanout(name, aliases);
        if targets.is_empty() {
          report.morphs_dropped += 1;
          report.record_drop(curve, &targeted.target);
          continue;
        }
        // Every match gets its own copy.
        for target in targets {
          group.add_targeted_curve(curve.clone(), RigTarget::MorphTarget(target));
          report.morphs_matched += 1;
        }
        report.morph_curves_matched += 1;
      }

      DonorTarget::Node { name } => match rig.resolve_node(name) {
        Some(node) => {
          bind(&mut group, &mut report, curve, RigTarget::Node(node), scaling, options);
          report.nodes_matched += 1;
        }
        None => {
          report.nodes_dropped += 1;
          report.record_drop(curve, &targeted.target);
        }
      },

      DonorTarget::Unnamed => {
        report.unnamed_dropped += 1;
        report.record_drop(curve, &targeted.target);
      }
    }
  }

  group.looping = true;
  group.speed_ratio = options.speed_ratio.unwrap_or(donor.speed_ratio);

  info!(
    "avatar-retarget: [{}] -> [{}] curves={} {}",
    donor.name,
    group.name,
    group.len(),
    report
  );
  if !report.dropped_sample.is_empty() {
    debug!("avatar-retarget: dropped sample {:?}", report.dropped_sample);
  }

  Retargeted { group, report }
}

///
/// `matched/total` per donor target kind, counted in donor curves.
///
impl fmt::Display for RetargetReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "bones={}/{} morphs={}/{} (bound {}) nodes={}/{} unnamed={} scaled={}",
      self.bones_matched,
      self.bones_matched + self.bones_dropped,
      self.morph_curves_matched,
      self.morph_curves_matched + self.morphs_dropped,
      self.morphs_matched,
      self.nodes_matched,
      self.nodes_matched + self.nodes_dropped,
      self.unnamed_dropped,
      self.scaled_curves
    )
  }
}

fn bind(
  group: &mut ResidentGroup,
  report: &mut RetargetReport,
  curve: &KeyedCurve,
  target: RigTarget,
  scaling: bool,
  options: &RetargetOptions,
) {
  if scaling && curve.is_positional() {
    group.add_targeted_curve(curve.scaled(options.scale_multiplier), target);
    report.scaled_curves += 1;
  } else {
    group.add_targeted_curve(curve.clone(), target);
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
