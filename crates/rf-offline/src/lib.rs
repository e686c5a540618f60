//! RF-Offline — Background Vocal Editing Pipeline
//!
//! Long-running work behind the vocal pitch editor:
//! - Audio loading (file decode or host buffer)
//! - Analysis: mel spectrogram, neural F0, voicing
//! - Note segmentation (neural streaming or heuristic)
//! - Full-project render and incremental resynthesis
//! - Model reloads
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        EditorController                           │
//! │                                                                   │
//! │  ┌──────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐ │
//! │  │  Loader  │ → │   Analysis   │ → │ Segmenter  │ → │ Project  │ │
//! │  │ (decode) │   │ (mel + F0)   │   │ (notes)    │   │ (edits)  │ │
//! │  └──────────┘   └──────────────┘   └────────────┘   └──────────┘ │
//! │                                                          │        │
//! │  ┌───────────────────────────────────────────────────────▼──────┐ │
//! │  │ IncrementalSynthesizer: dirty range → vocoder → splice       │ │
//! │  └──────────────────────────────────────────────────────────────┘ │
//! │                                                                   │
//! │  One WorkerSlot per job category, results over a channel          │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_offline::{EditorConfig, EditorController, EditorEvent};
//!
//! let mut editor = EditorController::new(EditorConfig::default().with_models_dir("models"))?;
//! editor.load_audio_file("take.wav")?;
//! for event in editor.run_until_idle(Duration::from_secs(60)) {
//!     println!("{:?}", event);
//! }
//!
//! editor.with_project_mut(|p| p.set_note_pitch_offset(0, 2.0));
//! editor.resynthesize()?;
//! ```

mod config;
mod controller;
mod decoder;
mod error;
mod job;
mod pipeline;
mod synthesizer;

pub use config::*;
pub use controller::*;
pub use decoder::*;
pub use error::*;
pub use job::*;
pub use pipeline::*;
pub use synthesizer::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
