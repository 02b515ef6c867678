//! Domain layer - Pure computational logic
//!
//! This module contains the genetic model and the probability computations,
//! without threading or I/O dependencies.

pub mod case;
pub mod engine;
pub mod genetics;
pub mod genotype;
pub mod hypothesis;
pub mod percentile;
pub mod population;
pub mod ratio;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Incremental FNV-1a hasher used for provenance hashes
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fnv1a(u64);

impl Fnv1a {
    pub(crate) fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    /// Write a field followed by a separator so adjacent fields cannot alias
    pub(crate) fn write_field(&mut self, field: &str) {
        self.write(field.as_bytes());
        self.write(&[0xff]);
    }

    pub(crate) fn finish(&self) -> u64 {
        self.0
    }
}
