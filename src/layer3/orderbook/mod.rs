// Order book analytics: wall lifecycle detection and signal confirmation

pub mod wall_detector;
pub mod signal_generator;

pub use wall_detector::{DetectorOutput, Wall, WallDetector, WallDetectorStats};
pub use signal_generator::{SignalGenerator, SignalGeneratorStats};
