//! Deterministic quantized Laplace noise.
//!
//! Instead of sampling, the list enumerates the support `0, ±1, ±2, ...` and
//! repeats each value `ceil(f(x) / quanta)` times, where `f` is the Laplace density
//! evaluated at `x / scale`. The list is later shuffled collectively, so that no
//! computing node knows which value is added to which output.

use crate::{bounded, Error};
use tracing::debug;

/// Laplace distribution with location `mean` and scale `b`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Laplace {
    pub mean: f64,
    pub b: f64,
}

impl Laplace {
    /// Probability density at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        (-(x - self.mean).abs() / self.b).exp() / (2.0 * self.b)
    }
}

/// Generates `size` noise values.
///
/// When `quanta` is zero it is derived from `limit`, so that the mass of
/// `[-limit, limit]` is spread over the whole list. A `scale` of zero is treated
/// as one.
pub fn generate(
    size: usize,
    mean: f64,
    b: f64,
    quanta: f64,
    scale: f64,
    limit: f64,
) -> Result<Vec<i64>, Error> {
    if size == 0 {
        return Ok(Vec::new());
    }
    if b <= 0.0 || !b.is_finite() {
        return Err(Error::InvalidParameters("laplace scale must be positive"));
    }
    let scale = if scale == 0.0 { 1.0 } else { scale };
    let laplace = Laplace { mean, b };

    let quanta = if quanta == 0.0 {
        if limit <= 0.0 {
            return Err(Error::InvalidParameters("either quanta or limit must be set"));
        }
        let mut mass = 0.0;
        let mut step = 0u64;
        loop {
            let x = step as f64 / scale;
            if x >= limit {
                break;
            }
            mass += if step == 0 {
                laplace.pdf(x)
            } else {
                2.0 * laplace.pdf(x)
            };
            step += 1;
        }
        mass / size as f64
    } else {
        quanta
    };
    if quanta <= 0.0 || !quanta.is_finite() {
        return Err(Error::InvalidParameters("quanta must be positive"));
    }

    let mut noise = Vec::with_capacity(size);
    let mut step = 0u64;
    while noise.len() < size {
        let x = step as f64 / scale;
        let repetitions = (laplace.pdf(x) / quanta).ceil() as usize;
        if repetitions == 0 {
            return Err(Error::InvalidParameters("noise list cannot be filled"));
        }
        let value = bounded((x * scale).round() as i128)?;
        for _ in 0..repetitions {
            noise.push(value);
            if value != 0 {
                noise.push(-value);
            }
            if noise.len() >= size {
                break;
            }
        }
        step += 1;
    }
    noise.truncate(size);
    debug!(size, quanta, "generated noise list");
    Ok(noise)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_list() {
        let noise = generate(100, 0.0, 1.0, 0.01, 1.0, 0.0).unwrap();
        assert_eq!(noise.len(), 100);

        // ceil(0.5 / 0.01) zeros first
        assert!(noise[..50].iter().all(|v| *v == 0));
        let positive = noise.iter().filter(|v| **v > 0).count();
        let negative = noise.iter().filter(|v| **v < 0).count();
        assert_eq!(positive, negative);
    }

    #[test]
    fn test_quanta_from_limit() {
        let noise = generate(50, 0.0, 2.0, 0.0, 1.0, 5.0).unwrap();
        assert_eq!(noise.len(), 50);
        assert!(noise.iter().all(|v| v.abs() <= 10));
        assert_eq!(noise, generate(50, 0.0, 2.0, 0.0, 0.0, 5.0).unwrap());
    }

    #[test]
    fn test_invalid() {
        assert!(generate(0, 0.0, 0.0, 0.0, 0.0, 0.0).unwrap().is_empty());
        assert!(generate(10, 0.0, 0.0, 0.1, 1.0, 0.0).is_err());
        assert!(generate(10, 0.0, 1.0, 0.0, 1.0, 0.0).is_err());
    }
}
