//! Inference backends
//!
//! - Tract backend (pure Rust ONNX inference, `tract` feature)

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "tract")]
pub use self::tract::TractInference;
