use std::io;

use itertools::Itertools;
use thiserror::Error;

///
/// Everything that can abort a single motion load.
///
/// None of these touch the resident groups of the category that was being loaded.
///
#[derive(Debug, Error)]
pub enum LoadError {
  /// The dropped file or resource could not be read.
  #[error("avatar-retarget: failed to read [{path}]. {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },

  /// The donor container is not valid glTF, or its buffers could not be resolved.
  #[error("avatar-retarget: failed to decode glTF container [{file_name}]. {source}")]
  Gltf {
    file_name: String,
    #[source]
    source: gltf::Error,
  },

  /// The curve file is not valid JSON.
  #[error("avatar-retarget: failed to parse curve file [{file_name}]. {source}")]
  Json {
    file_name: String,
    #[source]
    source: serde_json::Error,
  },

  /// A Live Link capture could not be read as CSV.
  #[error("avatar-retarget: failed to read capture [{file_name}]. {source}")]
  Csv {
    file_name: String,
    #[source]
    source: csv::Error,
  },

  /// A capture is missing a column it can't do without.
  #[error("avatar-retarget: capture [{file_name}] has no [{column}] column")]
  MissingColumn { file_name: String, column: String },

  /// A capture row carries a timecode that is not `HH:MM:SS:FF.mmm`.
  #[error("avatar-retarget: bad timecode [{timecode}] on row [{row}] of [{file_name}]")]
  Timecode {
    file_name: String,
    row: usize,
    timecode: String,
  },

  /// The donor container parsed fine but carries zero animations.
  #[error("avatar-retarget: no animations found in [{0}]")]
  NoAnimations(String),
}

///
/// A playback operation was attempted on a group that can no longer play.
///
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
  #[error("animation group [{0}] was already released")]
  Released(String),
}

///
/// Aggregate of everything that went wrong while stopping and releasing groups.
///
/// Disposal never aborts halfway; this is purely a diagnostic.
///
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("avatar-retarget: disposal finished with {} failure(s): {}", .failures.len(), .failures.iter().join("; "))]
pub struct DisposalError {
  pub failures: Vec<PlaybackError>,
}
