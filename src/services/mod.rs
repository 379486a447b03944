//! Service layer for separating concerns
//!
//! File I/O and progress reporting live here so the pipeline stays free of
//! filesystem and frontend details.

pub mod io;
pub mod progress;

pub use io::{ImageIOService, InputFile};
pub use progress::{
    ConsoleProgressReporter, DownloadProgress, NoOpProgressReporter, PipelineStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
