//! Retarget donor animation clips onto a loaded avatar.
//!
//! Two kinds of motion are supported: skeletal clips from glTF 2.0 containers
//! (`.glb` / `.gltf`), re-bound by name onto the avatar's bones, morph targets and nodes,
//! and blendshape curve files (`.json`) bound onto the avatar's morph targets through an
//! optional alias table such as an ARKit to character mapping.
//!
//! It's built on the [gltf](https://github.com/gltf-rs/gltf) crate.
//!
//! # Example
//!
//! ```no_run
//! use avatar_retarget::{AnimationController, Avatar, ControllerConfig, MotionCategory, SkeletalLoadOptions};
//!
//! let avatar = Avatar::load("tests/avatar.gltf").expect("Failed to load avatar");
//! let mut controller = AnimationController::new(&avatar, ControllerConfig::default());
//!
//! controller
//!   .load_skeletal("tests/donor_walk.gltf", SkeletalLoadOptions::default())
//!   .expect("Failed to load clip");
//! controller.play_all().expect("Failed to play");
//! println!("Playing: {:?}", controller.list(MotionCategory::Skeletal));
//! ```

pub mod alias_table;
pub mod animation;
pub mod controller;
pub mod error;
pub mod morph_import;
pub mod retarget;
pub mod rig_index;
pub mod scene;
mod utils;

pub use alias_table::AliasTable;
pub use animation::donor::{DonorAsset, DonorGroup, DonorTarget};
pub use animation::{AnimationGroup, PlaybackState, ResidentGroup, RigTarget};
pub use controller::{
  AnimationController, ControllerConfig, LoadOutcome, LoadReport, LoadSummary, MotionCategory,
  SkeletalLoadOptions,
};
pub use error::{DisposalError, LoadError, PlaybackError};
pub use morph_import::{CurveDocument, ImportReport, MorphImportOptions};
pub use retarget::{retarget, RetargetOptions, RetargetReport};
pub use rig_index::RigIndex;
pub use scene::avatar::Avatar;
pub use scene::SceneGraph;

// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
// ?                            CODE ENDS HERE, BEGIN UNIT TESTS.                                   ? //
// ? ////////////////////////////////////////////////////////////////////////////////////////////// ? //
