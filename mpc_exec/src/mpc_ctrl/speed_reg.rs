//! Curvature dependent target speed

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::f64::consts::PI;

use super::{Params, Polynomial};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Target speed derived from the heading deviation of the reference curve at the distance the
/// vehicle would cover over the horizon at its current speed.
///
/// The target is derated linearly from `max_speed` on a straight track, and is not limited. Use
/// [`target_speed`] for the value fed to the controller.
pub fn unlimited_target_speed(curve: &Polynomial, current_speed: f64, params: &Params) -> f64 {
    let lookahead_m = current_speed * params.step_duration_s * params.horizon_steps as f64;
    let theta = curve.eval_derivative(lookahead_m).atan();

    (params.max_speed - params.min_speed) 
        * (1.0 - theta.abs() * params.curvature_factor / PI) 
        + params.min_speed
}

/// Target speed limited to `[min_speed, max_speed]`.
///
/// Returns the speed and whether it had to be limited. A non-finite value is replaced by 
/// `min_speed`.
pub fn target_speed(curve: &Polynomial, current_speed: f64, params: &Params) -> (f64, bool) {
    let raw = unlimited_target_speed(curve, current_speed, params);
    let limited = util::maths::clamp(raw, params.min_speed, params.max_speed);

    (limited, limited != raw)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_straight_track() {
        let params = Params::default();
        let curve = Polynomial::new(vec![0.0; 4]);

        assert_eq!(target_speed(&curve, 50.0, &params), (params.max_speed, false));
        assert_eq!(unlimited_target_speed(&curve, 50.0, &params), params.max_speed);
    }

    #[test]
    fn test_half_range() {
        let params = Params::default();

        // Unit slope everywhere gives theta = pi/4 = pi/(2*curvature_factor)
        let curve = Polynomial::new(vec![0.0, 1.0, 0.0, 0.0]);
        let (speed, limited) = target_speed(&curve, 30.0, &params);

        assert_abs_diff_eq!(
            speed, 
            (params.max_speed - params.min_speed) / 2.0 + params.min_speed,
            epsilon = 1e-12
        );
        assert!(!limited);
    }

    #[test]
    fn test_lookahead() {
        let params = Params::default();

        // Slope is zero at x = 0 and grows with x, so only a moving vehicle is slowed
        let curve = Polynomial::new(vec![0.0, 0.0, 0.01, 0.0]);

        assert_eq!(target_speed(&curve, 0.0, &params).0, params.max_speed);
        assert!(target_speed(&curve, 40.0, &params).0 < params.max_speed);
    }

    #[test]
    fn test_limits() {
        let params = Params {
            curvature_factor: 6.0,
            ..Default::default()
        };

        // Steep slope drives the unlimited value below the floor
        let curve = Polynomial::new(vec![0.0, 20.0, 0.0, 0.0]);

        assert!(unlimited_target_speed(&curve, 50.0, &params) < params.min_speed);
        assert_eq!(target_speed(&curve, 50.0, &params), (params.min_speed, true));

        // Non-finite speed falls back to the floor
        let (speed, limited) = target_speed(&curve, std::f64::NAN, &params);
        assert_eq!(speed, params.min_speed);
        assert!(limited);
    }
}
