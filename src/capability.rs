//! Runtime capability probing
//!
//! Classifies the host into a [`CapabilityTier`] that decides whether the
//! model-based segmenter is attempted at all. Environment signals come from
//! an injectable [`EnvironmentProbe`] so tests can pin every signal.

use crate::config::ProbeThresholds;
use instant::{Duration, Instant};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use sysinfo::{System, SystemExt};
use tracing::{debug, info};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Coarse classification of available processing power
///
/// Variants are ordered from most to least capable, so `max` of two tiers
/// is the more conservative one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    /// Model-based segmentation is attempted first
    Full,
    /// Environment signals indicate a constrained host
    Constrained,
    /// Explicitly forced onto the cheaper path
    Forced,
}

impl CapabilityTier {
    /// Whether the model-based strategy belongs in the chain for this tier
    #[must_use]
    pub fn allows_model(self) -> bool {
        self == Self::Full
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Constrained => write!(f, "constrained"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

impl std::str::FromStr for CapabilityTier {
    type Err = crate::error::PhotoError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "constrained" => Ok(Self::Constrained),
            "forced" => Ok(Self::Forced),
            other => Err(crate::error::PhotoError::invalid_config(format!(
                "Unknown capability tier: {}. Supported: full, constrained, forced",
                other
            ))),
        }
    }
}

/// Source of environment signals
pub trait EnvironmentProbe: Send + Sync {
    /// Whether a baseline GPU/compute context is present
    fn has_gpu(&self) -> bool;

    /// Time taken by a fixed-iteration CPU loop
    fn benchmark(&self, iterations: u32) -> Duration;

    /// Reported device memory in gigabytes, `None` when unknown
    fn device_memory_gb(&self) -> Option<f64>;
}

/// Signal that pushed the tier below `Full`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DegradationSignal {
    Override(CapabilityTier),
    NoGpu,
    SlowCpu { elapsed_ms: u64 },
    LowMemory { gb: f64 },
}

/// Result of a capability assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAssessment {
    pub tier: CapabilityTier,
    pub signals: Vec<DegradationSignal>,
}

/// Combines probe signals into a tier
pub struct CapabilityProber<'a> {
    probe: &'a dyn EnvironmentProbe,
    thresholds: ProbeThresholds,
}

impl<'a> CapabilityProber<'a> {
    #[must_use]
    pub fn new(probe: &'a dyn EnvironmentProbe, thresholds: ProbeThresholds) -> Self {
        Self { probe, thresholds }
    }

    /// Evaluate override, GPU, CPU timing and memory signals in that order
    ///
    /// An override short-circuits every other check. Each environment
    /// signal degrades to `Constrained`; the most conservative tier wins.
    #[must_use]
    pub fn assess_environment(&self, force: Option<CapabilityTier>) -> CapabilityAssessment {
        if let Some(tier) = force {
            info!(tier = %tier, "Capability tier forced by configuration");
            return CapabilityAssessment {
                tier,
                signals: vec![DegradationSignal::Override(tier)],
            };
        }

        let mut tier = CapabilityTier::Full;
        let mut signals = Vec::new();

        if !self.probe.has_gpu() {
            debug!("No GPU context available");
            signals.push(DegradationSignal::NoGpu);
            tier = tier.max(CapabilityTier::Constrained);
        }

        let elapsed = self.probe.benchmark(self.thresholds.benchmark_iterations);
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms > self.thresholds.max_benchmark_ms {
            debug!(elapsed_ms, "CPU benchmark exceeded latency threshold");
            signals.push(DegradationSignal::SlowCpu { elapsed_ms });
            tier = tier.max(CapabilityTier::Constrained);
        }

        if let Some(gb) = self.probe.device_memory_gb() {
            if gb < self.thresholds.min_memory_gb {
                debug!(memory_gb = gb, "Device memory below threshold");
                signals.push(DegradationSignal::LowMemory { gb });
                tier = tier.max(CapabilityTier::Constrained);
            }
        }

        info!(tier = %tier, signals = signals.len(), "Capability assessment complete");
        CapabilityAssessment { tier, signals }
    }
}

/// Probe backed by the running host
///
/// The benchmark and memory readings are taken once per probe so repeated
/// assessments agree with each other.
#[derive(Debug, Default)]
pub struct SystemProbe {
    benchmark: OnceLock<Duration>,
    memory_gb: OnceLock<Option<f64>>,
}

impl SystemProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn run_benchmark(iterations: u32) -> Duration {
        let start = Instant::now();
        let mut acc = 0.0_f64;
        for i in 0..iterations {
            acc += f64::from(i).sqrt();
        }
        std::hint::black_box(acc);
        start.elapsed()
    }

    fn read_total_memory() -> Option<f64> {
        let mut system = System::new();
        system.refresh_memory();
        bytes_to_gb(system.total_memory())
    }
}

impl EnvironmentProbe for SystemProbe {
    fn has_gpu(&self) -> bool {
        if cfg!(target_os = "macos") {
            return true;
        }
        ["/dev/dri/renderD128", "/dev/nvidia0", "/dev/dxg"]
            .iter()
            .any(|path| std::path::Path::new(path).exists())
    }

    fn benchmark(&self, iterations: u32) -> Duration {
        *self
            .benchmark
            .get_or_init(|| Self::run_benchmark(iterations))
    }

    fn device_memory_gb(&self) -> Option<f64> {
        *self.memory_gb.get_or_init(Self::read_total_memory)
    }
}

/// Zero means the platform did not report a total
#[allow(clippy::cast_precision_loss)]
fn bytes_to_gb(bytes: u64) -> Option<f64> {
    (bytes > 0).then(|| bytes as f64 / BYTES_PER_GB)
}

/// Probe returning fixed signals
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub gpu: bool,
    pub benchmark: Duration,
    pub memory_gb: Option<f64>,
}

impl StaticProbe {
    /// A host where every signal passes
    #[must_use]
    pub fn capable() -> Self {
        Self {
            gpu: true,
            benchmark: Duration::from_millis(5),
            memory_gb: Some(16.0),
        }
    }
}

impl EnvironmentProbe for StaticProbe {
    fn has_gpu(&self) -> bool {
        self.gpu
    }

    fn benchmark(&self, _iterations: u32) -> Duration {
        self.benchmark
    }

    fn device_memory_gb(&self) -> Option<f64> {
        self.memory_gb
    }
}
