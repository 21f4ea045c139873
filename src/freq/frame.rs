//! Conversion of frequencies between spectral reference frames.
//!
//! Frequencies are Doppler-shifted by the observer's velocity along the line
//! of sight to the phase centre, relative to each frame. The velocity models
//! here are low precision (a few m/s), which is far below a typical channel
//! width.

use hifitime::{Duration, Epoch};
use itertools::Itertools;
use marlu::{constants::VEL_C, precession::get_lmst, LatLngHeight, RADec};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// \[rad/s\]
const EARTH_ROTATION_RATE: f64 = 7.292_115_146_7e-5;
/// \[metres\]
const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
/// Mean orbital speed of the Earth \[m/s\]
const EARTH_ORBITAL_SPEED: f64 = 29_785.0;
/// Speed of the Sun relative to the kinematic local standard of rest \[m/s\]
const SOLAR_MOTION_SPEED: f64 = 20_000.0;
/// The Julian date of the GPS epoch (1980-01-06).
const GPS_EPOCH_JD: f64 = 2_444_244.5;
const J2000_JD: f64 = 2_451_545.0;

lazy_static::lazy_static! {
    pub static ref FREQ_FRAMES: String = FreqFrame::iter().join(", ");

    /// The direction of the standard solar motion.
    static ref SOLAR_APEX: RADec = RADec::from_degrees(270.0, 30.0);
}

/// Supported spectral reference frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum FreqFrame {
    /// Topocentric; the frame of the antennas.
    #[strum(serialize = "TOPO")]
    Topo,

    /// Geocentric.
    #[strum(serialize = "GEO")]
    Geo,

    /// Barycentric.
    #[strum(serialize = "BARY")]
    Bary,

    /// Kinematic local standard of rest.
    #[strum(serialize = "LSRK")]
    Lsrk,
}

/// Everything needed to convert frequencies between frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub phase_centre: RADec,

    /// The Earth position of the instrumental array.
    pub array_position: LatLngHeight,

    /// The difference between UT1 and UTC.
    pub dut1: Duration,

    /// Output frequencies are expressed at this time.
    pub reference_time: Epoch,
}

fn unit_vector(radec: RADec) -> [f64; 3] {
    let (s_ra, c_ra) = radec.ra.sin_cos();
    let (s_dec, c_dec) = radec.dec.sin_cos();
    [c_dec * c_ra, c_dec * s_ra, s_dec]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

impl FrameContext {
    /// The observer's velocity toward the phase centre, relative to `frame`
    /// \[m/s\]. Positive values mean the observer is approaching the source.
    pub fn observer_velocity(&self, frame: FreqFrame, epoch: Epoch) -> f64 {
        match frame {
            FreqFrame::Topo => 0.0,
            FreqFrame::Geo => self.rotation_velocity(epoch),
            FreqFrame::Bary => self.rotation_velocity(epoch) + self.orbital_velocity(epoch),
            FreqFrame::Lsrk => {
                self.rotation_velocity(epoch)
                    + self.orbital_velocity(epoch)
                    + SOLAR_MOTION_SPEED * dot(unit_vector(*SOLAR_APEX), unit_vector(self.phase_centre))
            }
        }
    }

    fn rotation_velocity(&self, epoch: Epoch) -> f64 {
        let lmst = get_lmst(self.array_position.longitude_rad, epoch, self.dut1);
        let hour_angle = lmst - self.phase_centre.ra;
        let radius = EARTH_EQUATORIAL_RADIUS + self.array_position.height_metres;
        -EARTH_ROTATION_RATE
            * radius
            * self.array_position.latitude_rad.cos()
            * self.phase_centre.dec.cos()
            * hour_angle.sin()
    }

    fn orbital_velocity(&self, epoch: Epoch) -> f64 {
        let days = GPS_EPOCH_JD + epoch.to_gpst_seconds() / 86400.0 - J2000_JD;
        let mean_longitude = (280.460 + 0.985_647_4 * days).to_radians();
        let mean_anomaly = (357.528 + 0.985_600_3 * days).to_radians();
        let sun_longitude = mean_longitude
            + (1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin()).to_radians();
        let obliquity = (23.439 - 0.000_000_4 * days).to_radians();

        // The Earth moves perpendicular to the Sun's direction, in the ecliptic.
        let (s_sun, c_sun) = sun_longitude.sin_cos();
        let (s_obl, c_obl) = obliquity.sin_cos();
        let v_ecliptic_y = -EARTH_ORBITAL_SPEED * c_sun;
        let velocity = [
            EARTH_ORBITAL_SPEED * s_sun,
            v_ecliptic_y * c_obl,
            v_ecliptic_y * s_obl,
        ];
        dot(velocity, unit_vector(self.phase_centre))
    }

    /// The ratio of a frequency in `frame` to the same topocentric frequency.
    pub fn doppler_factor(&self, frame: FreqFrame, epoch: Epoch) -> f64 {
        let beta = self.observer_velocity(frame, epoch) / VEL_C;
        ((1.0 - beta) / (1.0 + beta)).sqrt()
    }

    /// Convert `freq`, measured in frame `from` at `from_epoch`, into frame
    /// `to` at `to_epoch`. The conversion goes through the barycentric frame,
    /// which is treated as inertial.
    pub fn convert(
        &self,
        freq: f64,
        from: FreqFrame,
        from_epoch: Epoch,
        to: FreqFrame,
        to_epoch: Epoch,
    ) -> f64 {
        let inertial = matches!(from, FreqFrame::Bary | FreqFrame::Lsrk);
        if from == to && (inertial || from_epoch == to_epoch) {
            return freq;
        }
        let bary = freq * self.doppler_factor(FreqFrame::Bary, from_epoch)
            / self.doppler_factor(from, from_epoch);
        bary * self.doppler_factor(to, to_epoch) / self.doppler_factor(FreqFrame::Bary, to_epoch)
    }
}
