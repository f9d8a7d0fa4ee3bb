//! Skeletal rig: clip data model, per-frame pose reconstruction and
//! bind-time skinning.

pub mod clip;
pub mod pose;
pub mod skin;

pub use clip::*;
pub use pose::*;
pub use skin::*;
