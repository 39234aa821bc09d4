use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use super::CurveDocument;
use crate::error::LoadError;
use crate::utils::file_name_from_path;

/// Name of the column holding `HH:MM:SS:FF.mmm` timecodes.
pub const TIMECODE_COLUMN: &str = "Timecode";

/// Frame rate the `FF` part of a timecode counts in, unless told otherwise.
pub const DEFAULT_TIMECODE_FPS: f64 = 60.0;

/// Playback rate written into converted documents.
pub const PLAYBACK_FPS: u32 = 60;

/// Capture columns that are not blendshapes.
pub const SKIPPED_COLUMNS: [&str; 11] = [
  TIMECODE_COLUMN,
  "BlendshapeCount",
  "HeadYaw",
  "HeadPitch",
  "HeadRoll",
  "LeftEyeYaw",
  "LeftEyePitch",
  "LeftEyeRoll",
  "RightEyeYaw",
  "RightEyePitch",
  "RightEyeRoll",
];

///
/// Parse a Live Link timecode `HH:MM:SS:FF.mmm` into seconds.
///
/// `FF` is a frame number at `timecode_fps`, `mmm` is milliseconds. Anything after
/// the millisecond digits is ignored.
///
pub fn parse_timecode(timecode: &str, timecode_fps: f64) -> Option<f64> {
  let (clock, millis) = timecode.trim().split_once('.')?;

  let fields: Vec<u64> = clock.split(':').map(digits).collect::<Option<_>>()?;
  let [hours, minutes, seconds, frames] = fields[..] else {
    return None;
  };

  let millis: String = millis.chars().take_while(char::is_ascii_digit).collect();
  let millis = digits(&millis)?;

  Some(
    hours as f64 * 3600.0
      + minutes as f64 * 60.0
      + seconds as f64
      + frames as f64 / timecode_fps
      + millis as f64 / 1000.0,
  )
}

/// A non empty run of ascii digits.
fn digits(text: &str) -> Option<u64> {
  if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_digit()) {
    return None;
  }
  text.parse().ok()
}

impl CurveDocument {
  ///
  /// Convert a Live Link Face CSV capture into a curve document.
  ///
  /// Times are seconds relative to the first row. Every numeric column that is not a
  /// timecode, head or eye rotation becomes a `curves` channel. Empty cells leave a gap.
  /// The result plays at 60 fps and records its duration.
  ///
  pub fn from_live_link_csv(file_name: &str, text: &str, timecode_fps: f64) -> Result<Self, LoadError> {
    let csv_error = |source| LoadError::Csv {
      file_name: file_name.to_string(),
      source,
    };

    let timecode_fps = if timecode_fps.is_finite() && timecode_fps > 0.0 {
      timecode_fps
    } else {
      warn!(
        "avatar-retarget: timecode fps [{}] is unusable, using [{}].",
        timecode_fps, DEFAULT_TIMECODE_FPS
      );
      DEFAULT_TIMECODE_FPS
    };

    let mut reader = ReaderBuilder::new()
      .flexible(true)
      .trim(Trim::All)
      .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(csv_error)?.clone();
    let Some(timecode_column) = headers.iter().position(|header| header == TIMECODE_COLUMN) else {
      return Err(LoadError::MissingColumn {
        file_name: file_name.to_string(),
        column: TIMECODE_COLUMN.to_string(),
      });
    };

    let records: Vec<StringRecord> = reader
      .records()
      .collect::<Result<_, _>>()
      .map_err(csv_error)?;

    let mut times = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
      let timecode = record.get(timecode_column).unwrap_or_default();
      match parse_timecode(timecode, timecode_fps) {
        Some(seconds) => times.push(seconds),
        None => {
          return Err(LoadError::Timecode {
            file_name: file_name.to_string(),
            row,
            timecode: timecode.to_string(),
          })
        }
      }
    }
    if let Some(&start) = times.first() {
      times.iter_mut().for_each(|time| *time -= start);
    }

    let mut curves = Map::new();
    let mut non_numeric = vec![];
    for (column, name) in headers.iter().enumerate() {
      if SKIPPED_COLUMNS.contains(&name) {
        continue;
      }

      // One bad cell and the whole column is out.
      let values: Option<Vec<Option<f64>>> = records
        .iter()
        .map(|record| match record.get(column).unwrap_or_default() {
          "" => Some(None),
          cell => cell.parse::<f64>().ok().map(Some),
        })
        .collect();
      let Some(values) = values else {
        non_numeric.push(name);
        continue;
      };

      let pairs = times
        .iter()
        .zip(values)
        .filter_map(|(&time, value)| {
          let value = value.filter(|value| value.is_finite())?;
          Some(json!([time, value]))
        })
        .collect();
      curves.insert(name.to_string(), Value::Array(pairs));
    }

    let duration = times.iter().copied().reduce(f64::max).unwrap_or(0.0);

    info!(
      "avatar-retarget: capture [{}] converted. rows={} curves={} duration={:.3}s",
      file_name,
      records.len(),
      curves.len(),
      duration
    );
    if !non_numeric.is_empty() {
      debug!("avatar-retarget: non numeric capture columns skipped {:?}", non_numeric);
    }

    Ok(CurveDocument {
      fps: Some(json!(PLAYBACK_FPS)),
      duration: Some(json!(duration)),
      curves: Some(Value::Object(curves)),
      morph_curves: None,
      channels: None,
    })
  }

  ///
  /// Read and convert a Live Link Face CSV capture from disk.
  ///
  pub fn load_live_link_csv<P: AsRef<Path>>(path: P, timecode_fps: f64) -> Result<Self, LoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_live_link_csv(&file_name_from_path(path), &text, timecode_fps)
  }
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //

#[cfg(test)]
mod tests {
  use super::*;
  use crate::alias_table::AliasTable;
  use crate::animation::CurveKeys;
  use crate::morph_import::{import_document, MorphImportOptions};
  use crate::rig_index::RigIndex;
  use crate::scene::SceneGraph;
  use float_cmp::approx_eq;

  const CAPTURE: &str = "\
Timecode,BlendshapeCount,EyeBlinkLeft,JawOpen,HeadYaw,LeftEyeRoll,Notes
10:00:00:00.000,61,0.0,0.1,0.5,0.2,calm
10:00:00:30.000,61,1.0,0.4,0.6,0.2,calm
10:00:01:00.000,61,0.5,,0.7,0.2,calm
";

  fn convert(text: &str) -> CurveDocument {
    match CurveDocument::from_live_link_csv("capture.csv", text, DEFAULT_TIMECODE_FPS) {
      Ok(document) => document,
      Err(e) => panic!("capture failed to convert. {}", e),
    }
  }

  fn approx(value: Option<f64>, expected: f64) -> bool {
    value.is_some_and(|value| approx_eq!(f64, value, expected, epsilon = 1e-9))
  }

  #[test]
  fn timecodes_parse_to_seconds() {
    assert!(approx(parse_timecode("00:00:01:30.000", 60.0), 1.5));
    assert!(approx(parse_timecode("01:02:03:06.250", 60.0), 3723.35));
    assert!(approx(parse_timecode("00:00:00:15.000", 30.0), 0.5));
    // Milliseconds are taken as written, not as a decimal fraction.
    assert!(approx(parse_timecode("00:00:00:00.5", 60.0), 0.005));
    assert!(approx(parse_timecode("00:00:00:00.120 trailing", 60.0), 0.12));

    assert_eq!(parse_timecode("00:00:01.000", 60.0), None);
    assert_eq!(parse_timecode("00:00:01:00", 60.0), None);
    assert_eq!(parse_timecode("00:-1:01:00.000", 60.0), None);
    assert_eq!(parse_timecode("00:00:01:00.", 60.0), None);
    assert_eq!(parse_timecode("", 60.0), None);
  }

  #[test]
  fn capture_columns_become_curves() {
    let document = convert(CAPTURE);

    assert!(approx_eq!(f64, document.fps(), 60.0, ulps = 2));
    assert!(approx(document.duration(), 1.0));

    let channels = document.channels();
    let names: Vec<&str> = channels.iter().map(|channel| channel.name.as_str()).collect();
    // Timecode, count, head and eye rotations and the text column are all left out.
    assert_eq!(names, vec!["EyeBlinkLeft", "JawOpen"]);

    assert_eq!(
      channels[0].samples,
      vec![
        (Some(0.0), Some(0.0)),
        (Some(0.5), Some(1.0)),
        (Some(1.0), Some(0.5))
      ]
    );
    // The empty cell leaves a gap instead of a zero.
    assert_eq!(
      channels[1].samples,
      vec![(Some(0.0), Some(0.1)), (Some(0.5), Some(0.4))]
    );
  }

  #[test]
  fn converted_capture_binds_like_any_curve_file() {
    let mut scene = SceneGraph::new();
    let root = scene.add_node(Some("__root__"), None);
    let head = scene.add_node(Some("Head"), Some(root));
    scene.attach_mesh(head, None, None, &[Some("Jaw_Open"), Some("Eye_Blink_L")]);
    let rig = RigIndex::build(&scene, root);
    let aliases = AliasTable::parse("arkit,targets\njawOpen,Jaw_Open\n");

    let imported = import_document(
      &convert(CAPTURE),
      "capture_morphs",
      &rig,
      &aliases,
      &MorphImportOptions::default(),
    );
    assert_eq!(imported.report.matched, 1);
    assert_eq!(imported.report.unmatched, vec!["EyeBlinkLeft"]);

    match imported.group.targeted_curves()[0].curve.keys() {
      CurveKeys::Scalar(keys) => {
        let frames: Vec<f32> = keys.iter().map(|key| key.frame).collect();
        assert_eq!(frames, vec![0.0, 30.0]);
      }
      other => panic!("expected scalar keys, got {:?}", other),
    }
  }

  #[test]
  fn converted_capture_writes_back_out() {
    let document = convert(CAPTURE);
    let text = match document.to_json() {
      Ok(text) => text,
      Err(e) => panic!("capture failed to serialize. {}", e),
    };
    assert!(text.contains("\"duration\""));
    assert!(!text.contains("morphCurves"));

    match CurveDocument::parse("capture.json", &text) {
      Ok(reparsed) => assert_eq!(reparsed.channels(), document.channels()),
      Err(e) => panic!("written capture did not parse. {}", e),
    }
  }

  #[test]
  fn broken_captures_are_rejected() {
    let no_timecode = CurveDocument::from_live_link_csv("a.csv", "EyeBlinkLeft\n0.5\n", 60.0);
    assert!(matches!(
      no_timecode,
      Err(LoadError::MissingColumn { column, .. }) if column == "Timecode"
    ));

    let bad_row = CurveDocument::from_live_link_csv(
      "b.csv",
      "Timecode,JawOpen\n00:00:00:00.000,0\nlater,1\n",
      60.0,
    );
    assert!(matches!(
      bad_row,
      Err(LoadError::Timecode { row: 1, timecode, .. }) if timecode == "later"
    ));

    assert!(matches!(
      CurveDocument::load_live_link_csv("tests/no_such_capture.csv", 60.0),
      Err(LoadError::Io { .. })
    ));
  }

  #[test]
  fn capture_file_loads_from_disk() {
    drop(env_logger::try_init());

    let document = match CurveDocument::load_live_link_csv("tests/face_capture.csv", 60.0) {
      Ok(document) => document,
      Err(e) => panic!("face_capture.csv failed to convert. {}", e),
    };
    let names: Vec<String> = document.channels().into_iter().map(|channel| channel.name).collect();
    assert_eq!(names, vec!["EyeBlinkLeft", "JawOpen", "MouthSmileLeft"]);
    // Twelve frames at 60 make a fifth of a second.
    assert!(approx(document.duration(), 0.2));
  }

  #[test]
  fn unusable_timecode_fps_falls_back() {
    let document = match CurveDocument::from_live_link_csv(
      "c.csv",
      "Timecode,JawOpen\n00:00:00:00.000,0\n00:00:00:30.000,1\n",
      0.0,
    ) {
      Ok(document) => document,
      Err(e) => panic!("capture failed to convert. {}", e),
    };
    assert!(approx(document.duration(), 0.5));
  }
}
