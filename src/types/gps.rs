//! GNSS fix data.

use chrono::NaiveDateTime;

/// A GNSS fix as reported by a `+CGNSINF` record.
///
/// Fields that fail to parse keep their zero default; a zero latitude or
/// longitude therefore also means "unset". The engine holds exactly one
/// current fix and replaces it wholesale according to the configured
/// [`FixPolicy`](crate::config::FixPolicy).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsFix {
    /// GNSS run status (0 = off, 1 = on).
    pub gnss_status: u32,
    /// Fix status (0 = no fix).
    pub fix_status: u32,
    /// UTC timestamp of the fix.
    pub utc: Option<NaiveDateTime>,
    /// Latitude in signed decimal degrees.
    pub latitude: f64,
    /// Longitude in signed decimal degrees.
    pub longitude: f64,
    /// Altitude in meters above mean sea level.
    pub altitude: f64,
    /// Speed over ground in km/h.
    pub speed: f64,
    /// Course over ground in degrees.
    pub course: f64,
    /// Horizontal dilution of precision.
    pub hdop: f64,
    /// Position dilution of precision.
    pub pdop: f64,
    /// Vertical dilution of precision.
    pub vdop: f64,
    /// GPS satellites in view.
    pub gps_satellites: u32,
    /// GNSS satellites used.
    pub gnss_satellites: u32,
    /// Carrier-to-noise ratio as a fraction of the 55 dBHz maximum.
    pub signal: f64,
}

/// Mean earth radius in meters, as used for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

impl GpsFix {
    /// Returns true if this record carries a usable position: fix status,
    /// latitude, longitude, altitude and PDOP all nonzero.
    #[must_use]
    pub fn is_good_position(&self) -> bool {
        self.fix_status != 0
            && self.latitude != 0.0
            && self.longitude != 0.0
            && self.altitude != 0.0
            && self.pdop != 0.0
    }

    /// Great-circle distance in meters to another fix (haversine formula).
    #[must_use]
    pub fn distance_to(&self, other: &GpsFix) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_good() {
        assert!(!GpsFix::default().is_good_position());
    }

    #[test]
    fn test_good_position_requires_all_gates() {
        let mut fix = GpsFix {
            fix_status: 1,
            latitude: 52.5,
            longitude: 13.4,
            altitude: 34.0,
            pdop: 1.2,
            ..GpsFix::default()
        };
        assert!(fix.is_good_position());

        fix.pdop = 0.0;
        assert!(!fix.is_good_position());
    }

    #[test]
    fn test_distance_to_same_position_is_zero() {
        let fix = GpsFix {
            latitude: 52.520_008,
            longitude: 13.404_954,
            ..GpsFix::default()
        };
        assert!(fix.distance_to(&fix).abs() < 1e-6);
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        let equator = GpsFix::default();
        let north = GpsFix {
            latitude: 1.0,
            ..GpsFix::default()
        };
        // One degree of latitude on a 6371 km sphere is ~111.195 km.
        let distance = equator.distance_to(&north);
        assert!((distance - 111_195.0).abs() < 10.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = GpsFix {
            latitude: 52.520_008,
            longitude: 13.404_954,
            ..GpsFix::default()
        };
        let b = GpsFix {
            latitude: 53.551_086,
            longitude: 9.993_682,
            ..GpsFix::default()
        };
        let there = a.distance_to(&b);
        let back = b.distance_to(&a);
        assert!((there - back).abs() < 1e-6);
        // Berlin to Hamburg is roughly 255 km.
        assert!((there - 255_000.0).abs() < 5_000.0);
    }
}
