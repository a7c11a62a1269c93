// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::engine::sequence_number::SeqNumber;
#[allow(unused_imports)]
use ::rand::{rngs::SmallRng, Rng, SeedableRng};

/// Chooses initial send sequence numbers.  The engine has no addresses or ports to hash, so a
/// PRNG stands in for the RFC 6528 construction; what matters is that successive incarnations do
/// not reuse nearby sequence numbers.
pub struct IsnGenerator {
    #[allow(dead_code)]
    rng: SmallRng,
}

impl IsnGenerator {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn generate(&mut self) -> SeqNumber {
        // Tests want predictable sequence numbers.
        SeqNumber::from(0)
    }

    #[cfg(not(test))]
    pub fn generate(&mut self) -> SeqNumber {
        SeqNumber::from(self.rng.gen::<u32>())
    }
}

impl Default for IsnGenerator {
    fn default() -> Self {
        Self::new()
    }
}
