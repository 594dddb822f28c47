//! Linear regression through the normal equations.
//!
//! For features `x_1..x_d` and label `y`, slots are laid out as
//! `n, sum(x_j), {sum(x_j*x_k): j <= k}, sum(y), {sum(x_j*y)}`. The querier solves
//! `(X^T X) c = X^T y` (with an intercept column) exactly over the rationals.

use crate::{bounded, Error};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};

/// Number of slots for `d` features: `(d^2 + 5d + 4) / 2`.
pub fn slot_count(d: usize) -> usize {
    (d * d + 5 * d + 4) / 2
}

/// Encodes feature columns `x` and label column `y`.
pub fn encode(x: &[&[i64]], y: &[i64]) -> Result<Vec<i64>, Error> {
    let d = x.len();
    let n = y.len();
    if x.iter().any(|column| column.len() != n) {
        return Err(Error::ColumnMismatch);
    }

    let mut slots: Vec<i128> = Vec::with_capacity(slot_count(d));
    slots.push(n as i128);
    for column in x {
        slots.push(column.iter().map(|v| *v as i128).sum());
    }
    for j in 0..d {
        for k in j..d {
            slots.push(
                x[j].iter()
                    .zip(x[k])
                    .map(|(a, b)| *a as i128 * *b as i128)
                    .sum(),
            );
        }
    }
    slots.push(y.iter().map(|v| *v as i128).sum());
    for column in x {
        slots.push(
            column
                .iter()
                .zip(y)
                .map(|(a, b)| *a as i128 * *b as i128)
                .sum(),
        );
    }
    slots.into_iter().map(bounded).collect()
}

/// Builds the augmented matrix `[X^T X | X^T y]` of size `(d+1) x (d+2)`.
fn system(slots: &[i64], d: usize) -> Vec<Vec<BigRational>> {
    let value = |i: usize| BigRational::from_integer(BigInt::from(slots[i]));
    let size = d + 1;
    let mut matrix = vec![vec![BigRational::zero(); size + 1]; size];

    // Intercept row and column
    matrix[0][0] = value(0);
    for j in 0..d {
        matrix[0][j + 1] = value(1 + j);
        matrix[j + 1][0] = value(1 + j);
    }

    // Upper triangle of the products, mirrored
    let mut index = 1 + d;
    for j in 0..d {
        for k in j..d {
            matrix[j + 1][k + 1] = value(index);
            matrix[k + 1][j + 1] = value(index);
            index += 1;
        }
    }

    // Right-hand side
    matrix[0][size] = value(index);
    index += 1;
    for j in 0..d {
        matrix[j + 1][size] = value(index + j);
    }
    matrix
}

/// Solves the normal equations exactly, returning `(c_0, c_1, ..., c_d)`.
pub fn solve(slots: &[i64], d: usize) -> Result<Vec<BigRational>, Error> {
    if slots.len() != slot_count(d) {
        return Err(Error::SlotCount(slot_count(d), slots.len()));
    }
    let mut matrix = system(slots, d);
    let size = d + 1;

    // Gauss-Jordan elimination
    for column in 0..size {
        let pivot = (column..size)
            .find(|row| !matrix[*row][column].is_zero())
            .ok_or(Error::Singular)?;
        matrix.swap(column, pivot);
        let divisor = matrix[column][column].clone();
        for entry in matrix[column].iter_mut() {
            *entry = &*entry / &divisor;
        }
        for row in 0..size {
            if row == column || matrix[row][column].is_zero() {
                continue;
            }
            let factor = matrix[row][column].clone();
            for k in column..=size {
                let delta = &factor * &matrix[column][k];
                matrix[row][k] -= delta;
            }
        }
    }
    Ok(matrix.into_iter().map(|mut row| row.swap_remove(size)).collect())
}

/// Solves the normal equations and converts the coefficients to floats.
pub fn decode(slots: &[i64], d: usize) -> Result<Vec<f64>, Error> {
    solve(slots, d)?
        .iter()
        .map(|c| c.to_f64().ok_or(Error::InvalidParameters("coefficient overflow")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_layout() {
        let x1 = [1, 2];
        let x2 = [3, 4];
        let y = [5, 6];
        let slots = encode(&[&x1, &x2], &y).unwrap();
        // n, sx1, sx2, sx1x1, sx1x2, sx2x2, sy, sx1y, sx2y
        assert_eq!(slots, vec![2, 3, 7, 5, 11, 25, 11, 17, 39]);
    }

    #[test]
    fn test_exact_solution() {
        let x1 = [1, 0, 1, 2, 3];
        let x2 = [2, 1, 0, 1, 5];
        let y = [11, 5, 3, 9, 27];
        let slots = encode(&[&x1, &x2], &y).unwrap();
        let coefficients = solve(&slots, 2).unwrap();
        let expected: Vec<BigRational> = [1, 2, 4]
            .iter()
            .map(|c| BigRational::from_integer(BigInt::from(*c)))
            .collect();
        assert_eq!(coefficients, expected);
    }

    #[test]
    fn test_rational_solution() {
        // y = x / 2 through the origin
        let x = [2, 4];
        let y = [1, 2];
        let slots = encode(&[&x], &y).unwrap();
        assert_eq!(decode(&slots, 1).unwrap(), vec![0.0, 0.5]);
    }

    #[test]
    fn test_singular() {
        let x = [1, 1, 1];
        let y = [1, 2, 3];
        let slots = encode(&[&x], &y).unwrap();
        assert_eq!(solve(&slots, 1), Err(Error::Singular));
    }
}
