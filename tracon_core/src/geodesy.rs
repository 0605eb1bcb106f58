//! Great-circle helpers in nautical miles and degrees.

use geo::{HaversineBearing, HaversineDestination, HaversineDistance, Point};

pub const METERS_PER_NM: f64 = 1852.0;

pub fn distance_nm(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b) / METERS_PER_NM
}

/// Initial true bearing from `a` to `b`, in `[0, 360)`.
pub fn true_bearing(a: Point<f64>, b: Point<f64>) -> f64 {
    normalize_heading(a.haversine_bearing(b))
}

/// Magnetic heading from `a` to `b` given an easterly variation.
pub fn magnetic_heading(a: Point<f64>, b: Point<f64>, magnetic_variation: f64) -> f64 {
    normalize_heading(true_bearing(a, b) - magnetic_variation)
}

pub fn normalize_heading(heading: f64) -> f64 {
    let h = heading % 360.0;
    if h < 0.0 {
        h + 360.0
    } else {
        h
    }
}

/// Signed shortest turn from `from` to `to`, positive to the right.
pub fn turn_angle(from: f64, to: f64) -> f64 {
    let diff = normalize_heading(to - from);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

/// Position reached after flying `nm` along `true_course`.
pub fn travel(from: Point<f64>, true_course: f64, nm: f64) -> Point<f64> {
    from.haversine_destination(true_course, nm * METERS_PER_NM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_degree_of_latitude_is_sixty_nm() {
        let a = Point::new(-122.0, 47.0);
        let b = Point::new(-122.0, 48.0);
        assert_relative_eq!(distance_nm(a, b), 60.0, epsilon = 0.1);
        assert_relative_eq!(true_bearing(a, b), 0.0, epsilon = 1e-6);
        assert_relative_eq!(true_bearing(b, a), 180.0, epsilon = 1e-6);
        assert_relative_eq!(magnetic_heading(a, b, 15.0), 345.0, epsilon = 1e-6);
    }

    #[test]
    fn test_turn_angle_shortest_way() {
        assert_relative_eq!(turn_angle(350.0, 10.0), 20.0);
        assert_relative_eq!(turn_angle(10.0, 350.0), -20.0);
        assert_relative_eq!(turn_angle(90.0, 270.0), 180.0);
        assert_relative_eq!(normalize_heading(-30.0), 330.0);
    }

    #[test]
    fn test_travel_distance() {
        let start = Point::new(-122.3, 47.4);
        let end = travel(start, 90.0, 5.0);
        assert_relative_eq!(distance_nm(start, end), 5.0, epsilon = 1e-6);
    }
}
