//! dayreel Compilation Model
//!
//! Defines the data contracts shared by the compilation pipeline and the
//! application around it:
//! - **Clips:** Ordered clip references with optional day labels
//! - **Progress:** Stage machine snapshots observed by the UI
//! - **Artifacts:** The compiled video and its output format
//! - **Records:** Stored clip and compilation rows at the persistence boundary

pub mod artifact;
pub mod clip;
pub mod progress;
pub mod records;

pub use artifact::*;
pub use clip::*;
pub use progress::*;
pub use records::*;
