/// Converts ARKit Live Link Face captures into curve documents.
pub mod live_link;

use std::cmp::Ordering;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::alias_table::AliasTable;
use crate::animation::{
  AnimationGroup, CurveKeys, Interpolation, KeyedCurve, Keyframe, ResidentGroup, RigTarget, TargetProperty,
};
use crate::error::LoadError;
use crate::rig_index::RigIndex;
use crate::utils::has_extension;

/// File extensions a curve file may have.
pub const CURVE_EXTENSIONS: [&str; 1] = ["json"];

/// Used when the document has no usable `fps`.
pub const DEFAULT_FPS: f64 = 60.0;

///
/// Channels whose last sample is at or below this are assumed to be in seconds.
///
/// There's no marker in the format for this. A file that really runs longer than
/// 300 seconds gets read as frame numbers.
///
pub const SECONDS_THRESHOLD: f64 = 300.0;

/// How many unmatched channel names get logged.
const UNMATCHED_LOG_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphImportOptions {
  /// Loop flag used when the group is played.
  pub looping: bool,
  pub speed_ratio: Option<f32>,
}

impl Default for MorphImportOptions {
  fn default() -> Self {
    MorphImportOptions {
      looping: true,
      speed_ratio: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
  /// Converted with `time * fps`.
  Seconds,
  /// Used as is.
  Frames,
}

impl TimeUnit {
  ///
  /// Guess the unit of a channel from its largest time value.
  ///
  pub fn infer(max_time: f64) -> Self {
    if max_time <= SECONDS_THRESHOLD {
      TimeUnit::Seconds
    } else {
      TimeUnit::Frames
    }
  }
}

///
/// A blendshape curve file.
///
/// Channels come from whichever of `curves`, `morphCurves` or `channels` shows up
/// first, in that order.
///
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveDocument {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  fps: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  duration: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  curves: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  morph_curves: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  channels: Option<Value>,
}

/// One named channel with its raw, unvalidated samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChannel {
  pub name: String,
  pub samples: Vec<(Option<f64>, Option<f64>)>,
}

impl CurveDocument {
  pub fn parse(file_name: &str, text: &str) -> Result<Self, LoadError> {
    serde_json::from_str(text).map_err(|source| LoadError::Json {
      file_name: file_name.to_string(),
      source,
    })
  }

  ///
  /// Frames per second. Falls back to 60 if missing, not a number, or not positive.
  ///
  /// Zero and negative rates count as missing.
  ///
  pub fn fps(&self) -> f64 {
    match self.fps.as_ref().and_then(Value::as_f64) {
      Some(fps) if fps.is_finite() && fps > 0.0 => fps,
      _ => DEFAULT_FPS,
    }
  }

  /// Length in seconds, when the writer recorded one. Informational only.
  pub fn duration(&self) -> Option<f64> {
    self.duration.as_ref().and_then(Value::as_f64)
  }

  ///
  /// Write the document back out as pretty printed JSON.
  ///
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }

  ///
  /// Every channel of the document, in document order.
  ///
  pub fn channels(&self) -> Vec<RawChannel> {
    if let Some(Value::Object(curves)) = &self.curves {
      return pair_channels(curves);
    }
    if let Some(Value::Object(curves)) = &self.morph_curves {
      return pair_channels(curves);
    }
    if let Some(Value::Array(channels)) = &self.channels {
      return channels.iter().filter_map(keyed_channel).collect();
    }
    vec![]
  }
}

/// `{"name": [[t, v], ...]}`
fn pair_channels(curves: &Map<String, Value>) -> Vec<RawChannel> {
  curves
    .iter()
    .map(|(name, pairs)| RawChannel {
      name: name.clone(),
      samples: match pairs {
        Value::Array(pairs) => pairs
          .iter()
          .map(|pair| match pair {
            Value::Array(pair) => (
              pair.first().and_then(number),
              pair.get(1).and_then(number),
            ),
            _ => (None, None),
          })
          .collect(),
        _ => vec![],
      },
    })
    .collect()
}

/// `{"name": ..., "keys": [{"t"|"time": ..., "v"|"value": ...}]}`
fn keyed_channel(channel: &Value) -> Option<RawChannel> {
  let name = channel.get("name")?.as_str()?;
  if name.is_empty() {
    return None;
  }
  let field = |key: &Value, short: &str, long: &str| {
    key
      .get(short)
      .filter(|value| !value.is_null())
      .or_else(|| key.get(long))
      .and_then(number)
  };

  let samples = match channel.get("keys") {
    Some(Value::Array(keys)) => keys
      .iter()
      .map(|key| (field(key, "t", "time"), field(key, "v", "value")))
      .collect(),
    _ => vec![],
  };

  Some(RawChannel {
    name: name.to_string(),
    samples,
  })
}

///
/// Numbers and strings holding numbers. `null`, blank strings and booleans coerce
/// to 0 or 1. Anything else, and non finite values, are rejected.
///
fn number(value: &Value) -> Option<f64> {
  let number = match value {
    Value::Number(number) => number.as_f64(),
    Value::String(text) if text.trim().is_empty() => Some(0.0),
    Value::String(text) => text.trim().parse::<f64>().ok(),
    Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
    Value::Null => Some(0.0),
    _ => None,
  }?;
  number.is_finite().then_some(number)
}

/// What happened to each channel of an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
  pub fps: f64,
  /// Keyed curves bound, one per matched morph target.
  pub matched: usize,
  pub matched_channels: usize,
  /// Channels no morph target answered to.
  pub unmatched: Vec<String>,
  /// Channels with fewer than two usable samples.
  pub too_short: Vec<String>,
  pub time_units: Vec<(String, TimeUnit)>,
}

/// A curve file bound onto the avatar's morph targets.
#[derive(Debug, Clone)]
pub struct MorphImport {
  pub group: ResidentGroup,
  pub report: ImportReport,
}

///
/// Whether a dropped file looks like a curve file.
///
pub fn accepts(file_name: &str) -> bool {
  has_extension(file_name, &CURVE_EXTENSIONS)
}

///
/// Import a curve file's text.
///
/// Returns `Ok(None)` if the file name isn't a curve file. Drop targets get all sorts of files.
///
pub fn import(
  file_name: &str,
  text: &str,
  rig: &RigIndex,
  aliases: &AliasTable,
  options: &MorphImportOptions,
) -> Result<Option<MorphImport>, LoadError> {
  if !accepts(file_name) {
    return Ok(None);
  }
  let document = CurveDocument::parse(file_name, text)?;
  Ok(Some(import_document(&document, &group_name(file_name), rig, aliases, options)))
}

///
/// Name for the group built out of a curve file.
///
pub fn group_name(file_name: &str) -> String {
  let stem = Path::new(file_name)
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| "curves".to_string());
  format!("{}_morphs", stem)
}

///
/// Bind every channel of a parsed curve document to the avatar's morph targets.
///
/// Each channel name goes through the alias table and may land on several morph
/// targets, every one of them gets its own curve. The group comes back stopped.
///
pub fn import_document(
  document: &CurveDocument,
  name: &str,
  rig: &RigIndex,
  aliases: &AliasTable,
  options: &MorphImportOptions,
) -> MorphImport {
  let fps = document.fps();
  let mut group: ResidentGroup = AnimationGroup::new(name);
  let mut report = ImportReport {
    fps,
    ..ImportReport::default()
  };

  for channel in document.channels() {
    if channel.samples.len() < 2 {
      report.too_short.push(channel.name);
      continue;
    }

    let targets = rig.resolve_morph_fanout(&channel.name, aliases);
    if targets.is_empty() {
      if report.unmatched.len() < 10 {
        debug!(
          "avatar-retarget: no morph target for [{}] -> {:?}",
          channel.name,
          aliases.resolve(&channel.name)
        );
      }
      report.unmatched.push(channel.name);
      continue;
    }

    let mut samples: Vec<(f64, f64)> = channel
      .samples
      .iter()
      .filter_map(|(time, value)| Some((time.as_ref().copied()?, value.as_ref().copied()?)))
      .collect();
    samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let Some(&(max_time, _)) = samples.last().filter(|_| samples.len() >= 2) else {
      report.too_short.push(channel.name);
      continue;
    };

    let unit = TimeUnit::infer(max_time);
    let keys: Vec<Keyframe<f32>> = samples
      .iter()
      .map(|&(time, value)| {
        let frame = match unit {
          TimeUnit::Seconds => time * fps,
          TimeUnit::Frames => time,
        };
        Keyframe::new(frame as f32, value as f32)
      })
      .collect();

    // Independent curve per target so each one can be dropped on its own later.
    for target in &targets {
      group.add_targeted_curve(
        KeyedCurve::new(
          format!("{}.influence", channel.name),
          TargetProperty::Influence,
          fps as f32,
          Interpolation::Linear,
          CurveKeys::Scalar(keys.clone()),
        ),
        RigTarget::MorphTarget(*target),
      );
    }
    report.matched += targets.len();
    report.matched_channels += 1;
    report.time_units.push((channel.name, unit));
  }

  group.looping = options.looping;
  if let Some(speed_ratio) = options.speed_ratio {
    group.speed_ratio = speed_ratio;
  }

  info!(
    "avatar-retarget: [{}] fps={} matched={} unmatched_count={} too_short={}",
    group.name,
    fps,
    report.matched,
    report.unmatched.len(),
    report.too_short.len()
  );
  if !report.unmatched.is_empty() {
    debug!(
      "avatar-retarget: unmatched sample {:?}",
      report.unmatched.iter().take(UNMATCHED_LOG_LIMIT).collect::<Vec<_>>()
    );
  }

  MorphImport { group, report }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
