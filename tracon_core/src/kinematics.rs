//! Simplified aircraft motion.
//!
//! No aerodynamics: aircraft turn at a fixed rate, climb and descend at
//! their type's nominal rates, and fly their heading at ground speed.

use crate::geodesy::{self, distance_nm, magnetic_heading, normalize_heading, turn_angle};
use crate::model::{Aircraft, TurnDirection};
use crate::scenario::{ApproachType, Waypoint, WaypointCommand};
use geo::Point;
use nalgebra::Vector2;

/// Standard-rate turn (degrees per second)
pub const TURN_RATE: f64 = 3.0;

/// A waypoint is passed once the aircraft is this close (nm)
pub const WAYPOINT_PASSED_NM: f64 = 0.2;

/// A waypoint this close but behind the aircraft also counts as passed
const OVERFLOWN_NM: f64 = 2.0;

/// Half-width of the localizer capture zone (nm)
const LOCALIZER_CAPTURE_NM: f64 = 0.5;

/// Knots per second
const ACCELERATION: f64 = 2.0;
const DECELERATION: f64 = 1.5;

/// Speed limit below 10,000 feet
const LOW_ALTITUDE_SPEED: f64 = 250.0;

pub const GO_AROUND_ALTITUDE: i32 = 3000;

/// Offset of `p` from `origin` in a local east/north plane (nm).
fn local_offset(origin: Point<f64>, p: Point<f64>) -> Vector2<f64> {
    let lat0 = origin.y().to_radians();
    Vector2::new(
        (p.x() - origin.x()) * 60.0 * lat0.cos(),
        (p.y() - origin.y()) * 60.0,
    )
}

fn course_vector(true_course: f64) -> Vector2<f64> {
    let rad = true_course.to_radians();
    Vector2::new(rad.sin(), rad.cos())
}

impl Aircraft {
    /// Places the aircraft at the first waypoint, pointed at the second,
    /// and consumes the first. Returns that waypoint's commands.
    pub fn launch(&mut self, magnetic_variation: f64) -> Vec<WaypointCommand> {
        if self.waypoints.is_empty() {
            return Vec::new();
        }
        let first = self.waypoints.remove(0);
        self.position = first.location;
        self.heading = match (first.heading, self.waypoints.first()) {
            (Some(h), _) => h as f64,
            (None, Some(next)) => magnetic_heading(first.location, next.location, magnetic_variation),
            (None, None) => self.heading,
        };
        self.take_next_restrictions();
        first.commands
    }

    /// Advances the aircraft by `dt` seconds.
    ///
    /// With `hold_final` set the last waypoint is never consumed (the
    /// caller decides what happens at the runway). Returns the commands of
    /// any waypoint passed.
    pub fn update(&mut self, dt: f64, magnetic_variation: f64, hold_final: bool) -> Vec<WaypointCommand> {
        self.update_heading(dt, magnetic_variation);
        self.update_altitude(dt);
        self.update_speed(dt);
        self.release_deferred();
        self.update_position(dt, magnetic_variation);
        self.try_intercept_localizer(magnetic_variation);
        let commands = self.sequence_waypoints(magnetic_variation, hold_final);
        self.on_final = self.cleared_approach && self.waypoints.len() == 1;
        commands
    }

    /// Abandons the approach: runway heading, climb to 3000.
    pub fn go_around(&mut self) {
        self.cleared_approach = false;
        self.on_final = false;
        self.waypoints.clear();
        self.assigned_heading = Some(normalize_heading(self.heading.round()) as i32);
        self.turn_direction = None;
        self.assigned_altitude = Some(GO_AROUND_ALTITUDE);
        self.altitude_after_speed = None;
        self.assigned_speed = None;
        self.speed_after_altitude = None;
        self.crossing_altitude = None;
        self.crossing_speed = None;
    }

    /// Replaces the route and flies it from its first fix.
    pub fn proceed_direct(&mut self, waypoints: Vec<Waypoint>) {
        self.waypoints = waypoints;
        self.assigned_heading = None;
        self.turn_direction = None;
        self.take_next_restrictions();
    }

    fn update_heading(&mut self, dt: f64, magnetic_variation: f64) {
        let target = match (self.assigned_heading, self.waypoints.first()) {
            (Some(h), _) => h as f64,
            (None, Some(wp)) => magnetic_heading(self.position, wp.location, magnetic_variation),
            (None, None) => return,
        };

        let mut diff = turn_angle(self.heading, target);
        match self.turn_direction {
            Some(TurnDirection::Left) if diff > 0.0 => diff -= 360.0,
            Some(TurnDirection::Right) if diff < 0.0 => diff += 360.0,
            _ => {}
        }

        let max_turn = TURN_RATE * dt;
        if diff.abs() <= max_turn {
            self.heading = normalize_heading(target);
            self.turn_direction = None;
        } else {
            self.heading = normalize_heading(self.heading + max_turn.copysign(diff));
        }
    }

    fn target_altitude(&self) -> Option<i32> {
        if self.cleared_approach {
            self.crossing_altitude.or(self.assigned_altitude)
        } else {
            self.assigned_altitude.or(self.crossing_altitude)
        }
    }

    fn update_altitude(&mut self, dt: f64) {
        let Some(target) = self.target_altitude() else {
            return;
        };
        let target = target as f64;
        let rate = &self.performance.rate;
        if self.altitude < target {
            self.altitude = (self.altitude + rate.climb / 60.0 * dt).min(target);
        } else if self.altitude > target {
            self.altitude = (self.altitude - rate.descent / 60.0 * dt).max(target);
        }
    }

    fn target_speed(&self) -> f64 {
        let limits = &self.performance.speed;
        let target = if self.on_final {
            limits.landing
        } else if let Some(spd) = self.assigned_speed.or(self.crossing_speed) {
            spd as f64
        } else if self.altitude < 10_000.0 {
            LOW_ALTITUDE_SPEED.min(limits.max)
        } else {
            self.ias
        };
        target.clamp(limits.min, limits.max)
    }

    fn update_speed(&mut self, dt: f64) {
        let target = self.target_speed();
        if self.ias < target {
            self.ias = (self.ias + ACCELERATION * dt).min(target);
        } else if self.ias > target {
            self.ias = (self.ias - DECELERATION * dt).max(target);
        }
    }

    /// Applies a deferred restriction once its complement is satisfied.
    fn release_deferred(&mut self) {
        if self.altitude_after_speed.is_some() && !self.speed_pending() {
            self.assigned_altitude = self.altitude_after_speed.take();
        }
        if self.speed_after_altitude.is_some() && !self.altitude_pending() {
            self.assigned_speed = self.speed_after_altitude.take();
        }
    }

    fn update_position(&mut self, dt: f64, magnetic_variation: f64) {
        // True airspeed grows about 2% per thousand feet.
        self.gs = self.ias * (1.0 + 0.02 * self.altitude.max(0.0) / 1000.0);
        let course = normalize_heading(self.heading + magnetic_variation);
        self.position = geodesy::travel(self.position, course, self.gs * dt / 3600.0);
    }

    /// Joins the final approach course when vectored across it.
    fn try_intercept_localizer(&mut self, magnetic_variation: f64) {
        if !self.cleared_approach || self.assigned_heading.is_none() {
            return;
        }
        let Some(approach) = &self.approach else {
            return;
        };
        if approach.approach_type != ApproachType::Ils {
            return;
        }
        let Some(seq) = approach.waypoints.first() else {
            return;
        };
        let n = seq.len();
        if n < 2 {
            return;
        }

        let threshold = seq[n - 1].location;
        let course = geodesy::true_bearing(seq[n - 2].location, threshold);
        let u = course_vector(course);
        let d = local_offset(threshold, self.position);
        let along = -d.dot(&u);
        let cross = d.x * u.y - d.y * u.x;

        let true_heading = normalize_heading(self.heading + magnetic_variation);
        if along <= 0.0 || cross.abs() > LOCALIZER_CAPTURE_NM || turn_angle(true_heading, course).abs() > 60.0 {
            return;
        }

        let remaining: Vec<_> = seq
            .iter()
            .filter(|wp| -local_offset(threshold, wp.location).dot(&u) < along)
            .cloned()
            .collect();
        self.waypoints = remaining;
        self.assigned_heading = None;
        self.turn_direction = None;
        self.take_next_restrictions();
    }

    fn sequence_waypoints(&mut self, magnetic_variation: f64, hold_final: bool) -> Vec<WaypointCommand> {
        if self.assigned_heading.is_some() {
            return Vec::new();
        }
        let Some(next) = self.waypoints.first() else {
            return Vec::new();
        };
        if hold_final && self.waypoints.len() == 1 {
            return Vec::new();
        }

        let distance = distance_nm(self.position, next.location);
        let bearing = magnetic_heading(self.position, next.location, magnetic_variation);
        let behind = turn_angle(self.heading, bearing).abs() > 90.0;
        if distance >= WAYPOINT_PASSED_NM && !(distance < OVERFLOWN_NM && behind) {
            return Vec::new();
        }

        let passed = self.waypoints.remove(0);
        if let Some(h) = passed.heading {
            self.assigned_heading = Some(h);
        }
        self.take_next_restrictions();
        passed.commands
    }

    /// Picks up the crossing restrictions of the next waypoint.
    fn take_next_restrictions(&mut self) {
        if let Some(next) = self.waypoints.first() {
            if next.altitude.is_some() {
                self.crossing_altitude = next.altitude;
            }
            if next.speed.is_some() {
                self.crossing_speed = next.speed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimTime;
    use crate::scenario::Approach;
    use approx::assert_relative_eq;

    fn aircraft_at(lat: f64, lon: f64, heading: f64) -> Aircraft {
        let mut ac = Aircraft::new("ASA12", SimTime::ZERO);
        ac.position = Point::new(lon, lat);
        ac.heading = heading;
        ac.altitude = 8000.0;
        ac.ias = 250.0;
        ac
    }

    fn ils() -> Approach {
        Approach {
            id: "I16R".into(),
            full_name: "ILS Runway 16R".into(),
            approach_type: ApproachType::Ils,
            waypoints: vec![vec![
                Waypoint::new("JAWBN", 47.76, -122.318).altitude(5000),
                Waypoint::new("FOURT", 47.63, -122.318).altitude(3000),
                Waypoint::new("_KSEA_16R", 47.4638, -122.318).command(WaypointCommand::Delete),
            ]],
        }
    }

    #[test]
    fn test_turns_at_standard_rate_in_assigned_direction() {
        let mut ac = aircraft_at(47.5, -122.3, 90.0);
        ac.assigned_heading = Some(60);
        ac.turn_direction = Some(TurnDirection::Right);

        ac.update(1.0, 0.0, false);
        assert_relative_eq!(ac.heading, 93.0, epsilon = 1e-9);

        for _ in 0..200 {
            ac.update(1.0, 0.0, false);
        }
        assert_relative_eq!(ac.heading, 60.0, epsilon = 1e-9);
        assert_eq!(ac.turn_direction, None);
    }

    #[test]
    fn test_climb_uses_performance_rate() {
        let mut ac = aircraft_at(47.5, -122.3, 90.0);
        ac.assigned_altitude = Some(10_000);
        ac.update(60.0, 0.0, false);
        assert_relative_eq!(ac.altitude, 10_000.0);

        ac.assigned_altitude = Some(9_000);
        ac.update(15.0, 0.0, false);
        assert_relative_eq!(ac.altitude, 10_000.0 - 1500.0 / 4.0);
    }

    #[test]
    fn test_deferred_altitude_waits_for_speed() {
        let mut ac = aircraft_at(47.5, -122.3, 90.0);
        ac.assigned_speed = Some(210);
        ac.altitude_after_speed = Some(5000);

        ac.update(1.0, 0.0, false);
        assert_eq!(ac.assigned_altitude, None);
        assert_relative_eq!(ac.altitude, 8000.0);

        for _ in 0..40 {
            ac.update(1.0, 0.0, false);
        }
        assert_eq!(ac.assigned_altitude, Some(5000));
        assert_eq!(ac.altitude_after_speed, None);
        assert!(ac.altitude < 8000.0);
    }

    #[test]
    fn test_waypoint_sequencing_runs_commands() {
        let mut ac = aircraft_at(47.5, -122.3, 0.0);
        ac.waypoints = vec![
            Waypoint::new("A", 47.55, -122.3).command(WaypointCommand::Handoff),
            Waypoint::new("B", 47.70, -122.3).altitude(6000),
        ];

        let mut commands = Vec::new();
        for _ in 0..120 {
            commands.extend(ac.update(1.0, 0.0, false));
        }
        assert_eq!(commands, vec![WaypointCommand::Handoff]);
        assert_eq!(ac.waypoints.len(), 1);
        assert_eq!(ac.crossing_altitude, Some(6000));
    }

    #[test]
    fn test_launch_points_at_second_waypoint() {
        let mut ac = Aircraft::new("ASA12", SimTime::ZERO);
        ac.waypoints = vec![
            Waypoint::new("A", 47.0, -122.3).command(WaypointCommand::Handoff),
            Waypoint::new("B", 48.0, -122.3),
        ];
        let commands = ac.launch(15.0);
        assert_eq!(commands, vec![WaypointCommand::Handoff]);
        assert_relative_eq!(ac.heading, 345.0, epsilon = 1e-6);
        assert_eq!(ac.waypoints.len(), 1);
    }

    #[test]
    fn test_localizer_intercept_from_vector() {
        // Ten miles north of the runway, two miles east, heading 210.
        let mut ac = aircraft_at(47.63, -122.27, 210.0);
        ac.approach = Some(ils());
        ac.cleared_approach = true;
        ac.assigned_heading = Some(210);
        ac.altitude = 3000.0;
        ac.ias = 180.0;

        for _ in 0..120 {
            ac.update(1.0, 0.0, false);
            if ac.assigned_heading.is_none() {
                break;
            }
        }
        assert_eq!(ac.assigned_heading, None);
        assert_eq!(ac.waypoints.last().map(|wp| wp.fix.as_str()), Some("_KSEA_16R"));
        assert!(ac.waypoints.iter().all(|wp| wp.fix != "JAWBN"));
        assert!(ac.on_final);
    }

    #[test]
    fn test_go_around_resets_approach() {
        let mut ac = aircraft_at(47.47, -122.318, 180.0);
        ac.approach = Some(ils());
        ac.cleared_approach = true;
        ac.waypoints = vec![Waypoint::new("_KSEA_16R", 47.4638, -122.318)];

        ac.go_around();
        assert!(!ac.cleared_approach);
        assert!(ac.waypoints.is_empty());
        assert_eq!(ac.assigned_heading, Some(180));
        assert_eq!(ac.assigned_altitude, Some(GO_AROUND_ALTITUDE));
        assert!(ac.approach.is_some());
    }
}
