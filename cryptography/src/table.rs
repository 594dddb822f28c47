//! Discrete-log lookup table used to decrypt small integers.

use crate::{
    group::{Element, G1, G1_ELEMENT_BYTE_LENGTH},
    Error,
};
use std::{collections::HashMap, sync::OnceLock};

/// Default bound of the homomorphic window.
pub const MAX_HOMOMORPHIC_INT: i64 = 10_000;

/// Maps `i * B` to `i` for every `i` in `[-max, max]`.
pub struct DecryptionTable {
    max: i64,
    points: HashMap<[u8; G1_ELEMENT_BYTE_LENGTH], i64>,
}

impl DecryptionTable {
    /// Builds the table by repeated addition of the generator.
    pub fn new(max: i64) -> Self {
        let max = max.abs();
        let mut points = HashMap::with_capacity((2 * max + 1) as usize);
        let base = G1::one();
        let mut current = G1::zero();
        points.insert(key(&current), 0);
        for i in 1..=max {
            current += base;
            points.insert(key(&current), i);
            points.insert(key(&-current), -i);
        }
        Self { max, points }
    }

    /// Returns the process-wide table for [MAX_HOMOMORPHIC_INT], built on first use.
    pub fn shared() -> &'static Self {
        static TABLE: OnceLock<DecryptionTable> = OnceLock::new();
        TABLE.get_or_init(|| Self::new(MAX_HOMOMORPHIC_INT))
    }

    /// Bound of the table.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Recovers `i` from `i * B`.
    pub fn lookup(&self, point: &G1) -> Result<i64, Error> {
        if point.is_zero() {
            return Ok(0);
        }
        self.points
            .get(&key(point))
            .copied()
            .ok_or(Error::DecryptOutOfRange)
    }
}

fn key(point: &G1) -> [u8; G1_ELEMENT_BYTE_LENGTH] {
    let mut out = [0u8; G1_ELEMENT_BYTE_LENGTH];
    out.copy_from_slice(&point.serialize());
    out
}
