//! Per-GOP two-stage perceptual-quality transcode parameter search.
//!
//! For each GOP of the input, the search driver picks an unsharpen amount
//! from the content's sharpness, sweeps rate factors against a VMAF target
//! chosen by marginal bitrate cost, and emits one `(frame_count, unsharpen,
//! aq_strength, target_quality, crf)` record for the final-pass encoder.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod buffer;
pub mod error;
pub mod project;
pub mod sample;
pub mod search;
pub mod sharpness;
pub mod table;
pub mod trial;
pub mod unsharp;
pub mod vmaf;

pub use error::Error;
pub use project::Project;
pub use search::{SearchDriver, SearchOptions};
pub use table::{GopRecord, ParamTable};

/// Shared cancellation flag; the driver finishes the trial in flight and
/// discards the in-flight GOP when it is set.
pub type CancelToken = Arc<AtomicBool>;
