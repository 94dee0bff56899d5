//! Polynomial reference curve and least squares fitting

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};
use num_dual::DualNum;
use serde::Serialize;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative size below which a diagonal entry of R marks the fit matrix as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A polynomial `y = f(x)`, coefficients stored lowest power first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polynomial {
    coeffs: Vec<f64>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised while fitting a polynomial.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("Invalid fit input: {0}")]
    InvalidInput(String),

    #[error("The fit matrix is rank deficient")]
    IllConditioned,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Polynomial {
    /// Create a polynomial from its coefficients, lowest power first.
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// Fit a polynomial of the given order to the points in the least squares sense.
    ///
    /// The Vandermonde system is solved by a QR decomposition rather than through the normal
    /// equations.
    pub fn fit(xs: &[f64], ys: &[f64], order: usize) -> Result<Self, FitError> {
        if xs.len() != ys.len() {
            return Err(FitError::InvalidInput(format!(
                "{} x values but {} y values", xs.len(), ys.len()
            )))
        }
        if order < 1 || order + 1 > xs.len() {
            return Err(FitError::InvalidInput(format!(
                "an order {} fit needs at least {} points, got {}", 
                order, order + 1, xs.len()
            )))
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(FitError::InvalidInput(String::from("non-finite coordinate")))
        }

        let num_coeffs = order + 1;

        // Vandermonde matrix, column j holds x^j
        let a = DMatrix::from_fn(xs.len(), num_coeffs, |i, j| xs[i].powi(j as i32));
        let b = DVector::from_column_slice(ys);

        // A column is dependent on the previous ones when its diagonal entry in R is negligible
        // relative to the column's own norm
        let col_norms: Vec<f64> = a.column_iter().map(|c| c.norm()).collect();

        let qr = a.qr();
        let r = qr.r();

        let rank_deficient = r.diagonal().iter()
            .zip(col_norms.iter())
            .any(|(d, n)| !(d.abs() > RANK_TOLERANCE * n));
        if rank_deficient {
            return Err(FitError::IllConditioned)
        }

        let qtb = qr.q().transpose() * b;
        let coeffs = r.solve_upper_triangular(&qtb)
            .ok_or(FitError::IllConditioned)?;

        Ok(Self {
            coeffs: coeffs.iter().cloned().collect()
        })
    }

    /// Evaluate the polynomial.
    pub fn eval<T: DualNum<f64> + Copy>(&self, x: T) -> T {
        let mut result = T::zero();

        for &c in self.coeffs.iter().rev() {
            result = result * x + c;
        }

        result
    }

    /// Evaluate the first derivative of the polynomial.
    pub fn eval_derivative<T: DualNum<f64> + Copy>(&self, x: T) -> T {
        let mut result = T::zero();

        for (i, &c) in self.coeffs.iter().enumerate().skip(1).rev() {
            result = result * x + c * (i as f64);
        }

        result
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_eval() {
        // 1 - 2x + 0.5x^3
        let p = Polynomial::new(vec![1.0, -2.0, 0.0, 0.5]);

        assert_eq!(p.eval(0.0), 1.0);
        assert_eq!(p.eval(2.0), 1.0);
        assert_eq!(p.eval(-1.0), 2.5);
        assert_eq!(p.eval_derivative(0.0), -2.0);
        assert_eq!(p.eval_derivative(2.0), 4.0);
    }

    #[test]
    fn test_fit_exact_cubic() {
        let truth = Polynomial::new(vec![0.7, -0.05, 0.012, -0.0004]);

        let xs: Vec<f64> = (0..8).map(|i| -3.0 + i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| truth.eval(x)).collect();

        let fitted = Polynomial::fit(&xs, &ys, 3).unwrap();

        assert_eq!(fitted.coeffs().len(), 4);
        for (f, t) in fitted.coeffs().iter().zip(truth.coeffs().iter()) {
            assert_abs_diff_eq!(*f, *t, epsilon = 1e-10);
        }

        // Exactly determined system
        let fitted = Polynomial::fit(&xs[..4], &ys[..4], 3).unwrap();
        for (f, t) in fitted.coeffs().iter().zip(truth.coeffs().iter()) {
            assert_abs_diff_eq!(*f, *t, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fit_straight_line() {
        let xs = [10.0, 20.0, 30.0, 40.0];
        let ys = [0.0; 4];

        let fitted = Polynomial::fit(&xs, &ys, 3).unwrap();

        for c in fitted.coeffs() {
            assert_abs_diff_eq!(*c, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fit_invalid_input() {
        let xs = [1.0, 2.0, 3.0];
        let ys = [1.0, 2.0, 3.0];

        // Too few points for a cubic
        match Polynomial::fit(&xs, &ys, 3) {
            Err(FitError::InvalidInput(_)) => (),
            r => panic!("Expected InvalidInput, got {:?}", r)
        }

        // Order zero
        match Polynomial::fit(&xs, &ys, 0) {
            Err(FitError::InvalidInput(_)) => (),
            r => panic!("Expected InvalidInput, got {:?}", r)
        }

        // Mismatched lengths
        match Polynomial::fit(&xs, &ys[..2], 1) {
            Err(FitError::InvalidInput(_)) => (),
            r => panic!("Expected InvalidInput, got {:?}", r)
        }

        // NaN coordinate
        match Polynomial::fit(&[1.0, std::f64::NAN, 3.0], &ys, 1) {
            Err(FitError::InvalidInput(_)) => (),
            r => panic!("Expected InvalidInput, got {:?}", r)
        }
    }

    #[test]
    fn test_fit_rank_deficient() {
        // All x values equal, only the constant term is observable
        let xs = [5.0; 5];
        let ys = [1.0, 2.0, 3.0, 4.0, 5.0];

        assert_eq!(Polynomial::fit(&xs, &ys, 3), Err(FitError::IllConditioned));
    }
}
