//! Conversion of points between the world frame and the vehicle frame

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Isometry2, Point2, Vector2};
use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Planar pose of the vehicle in the world frame.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct VehiclePose {
    /// Units: meters, Frame: world
    pub x: f64,

    /// Units: meters, Frame: world
    pub y: f64,

    /// Heading, positive anticlockwise from the world x axis.
    ///
    /// Units: radians
    pub psi: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehiclePose {
    pub fn new(x: f64, y: f64, psi: f64) -> Self {
        Self { x, y, psi }
    }

    /// Transform taking vehicle frame points into the world frame.
    fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.psi)
    }

    /// Express a world frame point in the vehicle frame.
    ///
    /// Translates by the negated vehicle position then rotates by the negated heading.
    pub fn to_vehicle_frame(&self, point_w: Point2<f64>) -> Point2<f64> {
        self.isometry().inverse_transform_point(&point_w)
    }

    /// Express a vehicle frame point in the world frame.
    ///
    /// Rotates by the heading then translates by the vehicle position.
    pub fn to_world_frame(&self, point_v: Point2<f64>) -> Point2<f64> {
        self.isometry().transform_point(&point_v)
    }

    /// Express a sequence of world frame coordinates in the vehicle frame, returning the
    /// vehicle frame x and y sequences.
    pub fn waypoints_to_vehicle_frame(
        &self, 
        xs_w: &[f64], 
        ys_w: &[f64]
    ) -> (Vec<f64>, Vec<f64>) {
        xs_w.iter()
            .zip(ys_w.iter())
            .map(|(&x, &y)| {
                let p = self.to_vehicle_frame(Point2::new(x, y));
                (p.x, p.y)
            })
            .unzip()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_to_vehicle_frame() {
        // Vehicle at (1, 2) facing world +y
        let pose = VehiclePose::new(1.0, 2.0, PI / 2.0);

        // A point 3 m ahead of the vehicle
        let p = pose.to_vehicle_frame(Point2::new(1.0, 5.0));
        assert_abs_diff_eq!(p.x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-12);

        // A point 1 m to the vehicle's left
        let p = pose.to_vehicle_frame(Point2::new(0.0, 2.0));
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let poses = [
            VehiclePose::new(0.0, 0.0, 0.0),
            VehiclePose::new(-12.5, 40.2, 0.3),
            VehiclePose::new(100.0, -3.0, -2.9),
            VehiclePose::new(7.0, 7.0, 3.0 * PI),
        ];
        let points = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, -1.0),
            Point2::new(-55.0, 23.5),
        ];

        for pose in poses.iter() {
            for p in points.iter() {
                let pv = pose.to_vehicle_frame(pose.to_world_frame(*p));
                assert_abs_diff_eq!(pv.x, p.x, epsilon = 1e-9);
                assert_abs_diff_eq!(pv.y, p.y, epsilon = 1e-9);

                let pw = pose.to_world_frame(pose.to_vehicle_frame(*p));
                assert_abs_diff_eq!(pw.x, p.x, epsilon = 1e-9);
                assert_abs_diff_eq!(pw.y, p.y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_waypoints_to_vehicle_frame() {
        let pose = VehiclePose::new(10.0, 0.0, PI);
        let (xs, ys) = pose.waypoints_to_vehicle_frame(&[5.0, 0.0], &[0.0, 2.0]);

        assert_eq!(xs.len(), 2);
        assert_abs_diff_eq!(xs[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ys[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(xs[1], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ys[1], -2.0, epsilon = 1e-12);
    }
}
