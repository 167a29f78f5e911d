//! gw-core: Shared types and utilities for GridWave
//!
//! This crate provides the foundational types used across all GridWave
//! crates: error handling, audio/video buffers, parameter descriptors,
//! module identity, and time types.

mod buffer;
mod error;
mod ids;
mod params;
mod time;

pub use buffer::*;
pub use error::*;
pub use ids::*;
pub use params::*;
pub use time::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_f32(self) -> f32 {
        self as u32 as f32
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}

/// Buffer size options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples64 = 64,
    Samples128 = 128,
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    /// Buffer duration in seconds at a given sample rate
    #[inline]
    pub fn duration_secs(self, sample_rate: SampleRate) -> f64 {
        self.as_usize() as f64 / sample_rate.as_f64()
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Samples512
    }
}
