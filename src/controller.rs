use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::alias_table::AliasTable;
use crate::animation::donor::DonorAsset;
use crate::animation::{stop_and_release, ResidentGroup};
use crate::error::{DisposalError, LoadError, PlaybackError};
use crate::morph_import::{self, CurveDocument, ImportReport, MorphImportOptions};
use crate::retarget::{retarget, RetargetOptions, RetargetReport, Retargeted};
use crate::rig_index::RigIndex;
use crate::scene::avatar::Avatar;
use crate::utils::file_name_from_path;

/// Where the alias table is looked for unless configured otherwise.
pub const DEFAULT_ALIAS_TABLE: &str = "CCARKitMapping.csv";

///
/// Knobs for one controller. Fixed for the lifetime of an avatar load.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
  /// None skips the alias table entirely; names must then match exactly.
  pub alias_table_path: Option<PathBuf>,
  /// Speed ratio for retargeted skeletal groups. None keeps the donor's.
  pub speed_ratio: Option<f32>,
  /// Start skeletal groups as soon as they are loaded.
  pub auto_start: bool,
  /// Scale multiplier used when a skeletal load doesn't give one.
  pub default_scale_multiplier: f32,
  pub morph_looping: bool,
  pub morph_speed_ratio: Option<f32>,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    ControllerConfig {
      alias_table_path: Some(PathBuf::from(DEFAULT_ALIAS_TABLE)),
      speed_ratio: None,
      auto_start: false,
      default_scale_multiplier: 1.0,
      morph_looping: true,
      morph_speed_ratio: None,
    }
  }
}

/// Per skeletal load options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SkeletalLoadOptions {
  pub scale_multiplier: Option<f32>,
}

/// The two independent kinds of resident motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionCategory {
  Skeletal,
  Morph,
}

impl fmt::Display for MotionCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MotionCategory::Skeletal => write!(f, "skeletal"),
      MotionCategory::Morph => write!(f, "morph"),
    }
  }
}

#[derive(Debug, Clone)]
pub enum LoadReport {
  /// One report per donor group.
  Skeletal(Vec<RetargetReport>),
  Morph(ImportReport),
}

/// What a successful load did.
#[derive(Debug)]
pub struct LoadSummary {
  pub category: MotionCategory,
  /// Names of the new resident groups.
  pub groups: Vec<String>,
  pub report: LoadReport,
  /// The groups that were resident before, now stopped and released.
  pub evicted: Vec<ResidentGroup>,
  /// Anything that went wrong while evicting. Never stops the load.
  pub disposal: Result<(), DisposalError>,
}

#[derive(Debug)]
pub enum LoadOutcome {
  /// Not a file this category handles. Nothing changed.
  Ignored,
  Loaded(LoadSummary),
}

///
/// Owns the resident animation groups of one avatar.
///
/// Holds at most one set of skeletal groups and at most one morph group. Every load
/// stops and releases what was resident in its category before the new groups move
/// in, and a load that fails leaves the resident groups alone.
///
#[derive(Debug)]
pub struct AnimationController {
  rig: RigIndex,
  aliases: AliasTable,
  config: ControllerConfig,
  skeletal: Vec<ResidentGroup>,
  morph: Option<ResidentGroup>,
}

impl AnimationController {
  ///
  /// Index the avatar and load the alias table named in the config.
  ///
  pub fn new(avatar: &Avatar, config: ControllerConfig) -> Self {
    let rig = RigIndex::build(&avatar.scene, avatar.root);
    rig.log_summary();
    let aliases = match &config.alias_table_path {
      Some(path) => AliasTable::load(path),
      None => AliasTable::new(),
    };
    Self::with_parts(rig, aliases, config)
  }

  pub fn with_parts(rig: RigIndex, aliases: AliasTable, config: ControllerConfig) -> Self {
    AnimationController {
      rig,
      aliases,
      config,
      skeletal: vec![],
      morph: None,
    }
  }

  pub fn rig(&self) -> &RigIndex {
    &self.rig
  }

  pub fn aliases(&self) -> &AliasTable {
    &self.aliases
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  ///
  /// Load a donor `.glb` / `.gltf` clip from disk and retarget every animation in it.
  ///
  pub fn load_skeletal<P: AsRef<Path>>(
    &mut self,
    path: P,
    options: SkeletalLoadOptions,
  ) -> Result<LoadOutcome, LoadError> {
    let path = path.as_ref();
    if !DonorAsset::accepts(&file_name_from_path(path)) {
      return Ok(LoadOutcome::Ignored);
    }
    info!("avatar-retarget: loading skeletal animation [{}]", path.display());
    let asset = DonorAsset::load(path)?;
    self.install_skeletal(asset, options)
  }

  ///
  /// Same as [`Self::load_skeletal`] for a dropped file's bytes. Only self contained containers work.
  ///
  pub fn load_skeletal_bytes(
    &mut self,
    file_name: &str,
    bytes: &[u8],
    options: SkeletalLoadOptions,
  ) -> Result<LoadOutcome, LoadError> {
    if !DonorAsset::accepts(file_name) {
      return Ok(LoadOutcome::Ignored);
    }
    info!("avatar-retarget: loading skeletal animation [{}]", file_name);
    let asset = DonorAsset::from_slice(bytes, file_name, None)?;
    self.install_skeletal(asset, options)
  }

  fn install_skeletal(
    &mut self,
    asset: DonorAsset,
    options: SkeletalLoadOptions,
  ) -> Result<LoadOutcome, LoadError> {
    if asset.groups.is_empty() {
      warn!("avatar-retarget: No animations found in [{}]", asset.file_name);
      return Err(LoadError::NoAnimations(asset.file_name));
    }

    let (evicted, disposal) = evict(std::mem::take(&mut self.skeletal), MotionCategory::Skeletal);

    let retarget_options = RetargetOptions {
      scale_multiplier: options
        .scale_multiplier
        .unwrap_or(self.config.default_scale_multiplier),
      speed_ratio: self.config.speed_ratio,
    };

    let mut reports = Vec::with_capacity(asset.groups.len());
    for donor in &asset.groups {
      let Retargeted { group, report } = retarget(donor, &self.rig, &self.aliases, &retarget_options);
      self.skeletal.push(group);
      reports.push(report);
    }

    if self.config.auto_start {
      if let Err(e) = self.play(MotionCategory::Skeletal) {
        error!("avatar-retarget: auto start failed. {}", e);
      }
    }

    info!(
      "avatar-retarget: Loaded [{}] skeletal group(s) from [{}]",
      self.skeletal.len(),
      asset.file_name
    );

    Ok(LoadOutcome::Loaded(LoadSummary {
      category: MotionCategory::Skeletal,
      groups: self.skeletal.iter().map(|group| group.name.clone()).collect(),
      report: LoadReport::Skeletal(reports),
      evicted,
      disposal,
    }))
  }

  ///
  /// Load a blendshape curve `.json` from disk.
  ///
  pub fn load_blendshape<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadOutcome, LoadError> {
    let path = path.as_ref();
    let file_name = file_name_from_path(path);
    if !morph_import::accepts(&file_name) {
      return Ok(LoadOutcome::Ignored);
    }
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
      path: path.display().to_string(),
      source,
    })?;
    self.load_blendshape_text(&file_name, &text)
  }

  ///
  /// Load a blendshape curve file from its text.
  ///
  /// The text is parsed before anything is evicted, so a broken file keeps the current group playing.
  ///
  pub fn load_blendshape_text(&mut self, file_name: &str, text: &str) -> Result<LoadOutcome, LoadError> {
    if !morph_import::accepts(file_name) {
      return Ok(LoadOutcome::Ignored);
    }
    info!("avatar-retarget: loading blendshape animation [{}]", file_name);
    let document = CurveDocument::parse(file_name, text)?;

    let (evicted, disposal) = evict(self.morph.take().into_iter().collect(), MotionCategory::Morph);

    let options = MorphImportOptions {
      looping: self.config.morph_looping,
      speed_ratio: self.config.morph_speed_ratio,
    };
    let imported = morph_import::import_document(
      &document,
      &morph_import::group_name(file_name),
      &self.rig,
      &self.aliases,
      &options,
    );

    let groups = vec![imported.group.name.clone()];
    self.morph = Some(imported.group);

    Ok(LoadOutcome::Loaded(LoadSummary {
      category: MotionCategory::Morph,
      groups,
      report: LoadReport::Morph(imported.report),
      evicted,
      disposal,
    }))
  }

  ///
  /// Play everything resident. Both categories are attempted even if one fails.
  ///
  pub fn play_all(&mut self) -> Result<(), PlaybackError> {
    info!("avatar-retarget: Playing all animations");
    let skeletal = self.play(MotionCategory::Skeletal);
    let morph = self.play(MotionCategory::Morph);
    skeletal.and(morph)
  }

  ///
  /// Play every resident group of a category. Skeletal groups always loop, morph
  /// groups use the configured loop flag.
  ///
  pub fn play(&mut self, category: MotionCategory) -> Result<(), PlaybackError> {
    match category {
      MotionCategory::Skeletal => self
        .skeletal
        .iter_mut()
        .try_for_each(|group| group.play(true)),
      MotionCategory::Morph => match &mut self.morph {
        Some(group) => {
          let looping = group.looping;
          group.play(looping)
        }
        None => Ok(()),
      },
    }
  }

  ///
  /// Play a single skeletal group. Out of range indices do nothing.
  ///
  pub fn play_skeletal(&mut self, index: usize) -> Result<(), PlaybackError> {
    match self.skeletal.get_mut(index) {
      Some(group) => group.play(true),
      None => Ok(()),
    }
  }

  pub fn stop(&mut self, category: MotionCategory) -> Result<(), PlaybackError> {
    match category {
      MotionCategory::Skeletal => self.skeletal.iter_mut().try_for_each(|group| group.stop()),
      MotionCategory::Morph => self.morph.as_mut().map_or(Ok(()), |group| group.stop()),
    }
  }

  /// Names of the resident groups of a category.
  pub fn list(&self, category: MotionCategory) -> Vec<&str> {
    self
      .resident(category)
      .into_iter()
      .map(|group| group.name.as_str())
      .collect()
  }

  pub fn resident(&self, category: MotionCategory) -> Vec<&ResidentGroup> {
    match category {
      MotionCategory::Skeletal => self.skeletal.iter().collect(),
      MotionCategory::Morph => self.morph.iter().collect(),
    }
  }

  ///
  /// Stop and release everything resident. Safe to call more than once.
  ///
  pub fn dispose(&mut self) -> Result<(), DisposalError> {
    let (_, skeletal) = evict(std::mem::take(&mut self.skeletal), MotionCategory::Skeletal);
    let (_, morph) = evict(self.morph.take().into_iter().collect(), MotionCategory::Morph);

    match (skeletal, morph) {
      (Ok(()), Ok(())) => Ok(()),
      (skeletal, morph) => {
        let mut failures = vec![];
        for result in [skeletal, morph] {
          if let Err(e) = result {
            failures.extend(e.failures);
          }
        }
        Err(DisposalError { failures })
      }
    }
  }
}

impl Drop for AnimationController {
  fn drop(&mut self) {
    if let Err(e) = self.dispose() {
      error!("{}", e);
    }
  }
}

///
/// Stop and release the given groups, logging instead of failing.
///
fn evict(
  mut groups: Vec<ResidentGroup>,
  category: MotionCategory,
) -> (Vec<ResidentGroup>, Result<(), DisposalError>) {
  let disposal = stop_and_release(groups.iter_mut());
  if let Err(e) = &disposal {
    warn!("avatar-retarget: evicting {} groups. {}", category, e);
  }
  (groups, disposal)
}

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //

#[cfg(test)]
mod tests {
  use super::*;
  use crate::animation::PlaybackState;
  use crate::scene::SceneGraph;

  fn controller() -> AnimationController {
    let mut scene = SceneGraph::new();
    let root = scene.add_node(Some("__root__"), None);
    let head = scene.add_node(Some("Head"), Some(root));
    scene.attach_mesh(head, None, None, &[Some("Smile"), Some("Jaw_Open")]);

    let rig = RigIndex::build(&scene, root);
    let aliases = AliasTable::parse("arkit,targets\nsmile,Smile\njawOpen,Jaw_Open\n");
    let config = ControllerConfig {
      alias_table_path: None,
      ..ControllerConfig::default()
    };
    AnimationController::with_parts(rig, aliases, config)
  }

  const SMILE: &str = r#"{"fps": 30, "curves": {"smile": [[0, 0], [1, 1]]}}"#;
  const JAW: &str = r#"{"fps": 30, "curves": {"jawOpen": [[0, 0], [2, 1]]}}"#;

  fn loaded(outcome: Result<LoadOutcome, LoadError>) -> LoadSummary {
    match outcome {
      Ok(LoadOutcome::Loaded(summary)) => summary,
      Ok(LoadOutcome::Ignored) => panic!("load was ignored"),
      Err(e) => panic!("load failed. {}", e),
    }
  }

  #[test]
  fn second_blendshape_load_replaces_the_first() {
    let mut controller = controller();

    let first = loaded(controller.load_blendshape_text("smile.json", SMILE));
    assert!(first.evicted.is_empty());
    assert!(controller.play(MotionCategory::Morph).is_ok());

    let second = loaded(controller.load_blendshape_text("jaw.json", JAW));
    assert_eq!(second.evicted.len(), 1);
    assert_eq!(second.evicted[0].name, "smile_morphs");
    assert_eq!(second.evicted[0].state(), PlaybackState::Released);
    assert!(second.disposal.is_ok());

    assert_eq!(controller.list(MotionCategory::Morph), vec!["jaw_morphs"]);
    // The new group waits for play.
    assert_eq!(
      controller.resident(MotionCategory::Morph)[0].state(),
      PlaybackState::Stopped
    );
  }

  #[test]
  fn failed_loads_keep_the_resident_group() {
    let mut controller = controller();
    loaded(controller.load_blendshape_text("smile.json", SMILE));
    assert!(controller.play_all().is_ok());

    assert!(matches!(
      controller.load_blendshape_text("broken.json", "{\"curves\": [[["),
      Err(LoadError::Json { .. })
    ));
    let resident = controller.resident(MotionCategory::Morph);
    assert_eq!(resident.len(), 1);
    assert!(resident[0].is_playing());
  }

  #[test]
  fn foreign_files_are_ignored() {
    let mut controller = controller();
    loaded(controller.load_blendshape_text("smile.json", SMILE));

    assert!(matches!(
      controller.load_blendshape_text("notes.txt", "whatever"),
      Ok(LoadOutcome::Ignored)
    ));
    assert!(matches!(
      controller.load_skeletal_bytes("clip.fbx", b"Kaydara FBX Binary", SkeletalLoadOptions::default()),
      Ok(LoadOutcome::Ignored)
    ));
    assert_eq!(controller.list(MotionCategory::Morph), vec!["smile_morphs"]);
  }

  #[test]
  fn donor_without_animations_aborts() {
    let mut controller = controller();
    loaded(controller.load_blendshape_text("smile.json", SMILE));

    let result = controller.load_skeletal_bytes(
      "static.gltf",
      br#"{"asset": {"version": "2.0"}}"#,
      SkeletalLoadOptions::default(),
    );
    assert!(matches!(result, Err(LoadError::NoAnimations(name)) if name == "static.gltf"));

    let garbage = controller.load_skeletal_bytes("garbage.glb", b"not a container", SkeletalLoadOptions::default());
    assert!(matches!(garbage, Err(LoadError::Gltf { .. })));

    assert!(controller.list(MotionCategory::Skeletal).is_empty());
    assert_eq!(controller.list(MotionCategory::Morph).len(), 1);
  }

  #[test]
  fn stop_and_dispose() {
    let mut controller = controller();
    loaded(controller.load_blendshape_text("smile.json", SMILE));
    assert!(controller.play(MotionCategory::Morph).is_ok());
    assert!(controller.stop(MotionCategory::Morph).is_ok());
    assert!(!controller.resident(MotionCategory::Morph)[0].is_playing());

    assert!(controller.dispose().is_ok());
    assert!(controller.list(MotionCategory::Morph).is_empty());
    // Nothing left to dispose the second time around.
    assert!(controller.dispose().is_ok());
    assert!(controller.play_all().is_ok());
  }

  #[test]
  fn missing_blendshape_file_is_an_io_error() {
    let mut controller = controller();
    assert!(matches!(
      controller.load_blendshape("tests/no_such_curves.json"),
      Err(LoadError::Io { .. })
    ));
  }
}
