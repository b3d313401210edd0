use crate::config::SensorIdentity;
use crate::error::FrameError;
use crate::frame::{Frame, FramePower};

/// The result of one accepted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub sensor_index: u32,
    pub sensor_name: String,
    pub net_watts: i64,
    /// Solar baseline to carry into the next read
    pub solar_baseline: i64,
}

/// Turns a frame into a reading, netting three-phase mains against the last
/// known solar generation.
///
/// The subtraction uses `solar_baseline` as passed in. A solar frame only
/// changes the baseline that is returned, never the one used for this frame.
/// Solar readings under `solar_threshold` are reported as 0 W while the
/// returned baseline keeps the raw value.
pub fn reconcile(
    frame: &Frame,
    solar_baseline: i64,
    identity: &SensorIdentity,
    solar_threshold: i64,
) -> Result<Reading, FrameError> {
    let mut watts = match frame.power {
        FramePower::ThreePhase([ch1, ch2, ch3]) => ch1
            .checked_add(ch2)
            .and_then(|sum| sum.checked_add(ch3))
            .and_then(|sum| sum.checked_sub(solar_baseline))
            .ok_or(FrameError::Overflow(frame.sensor_index))?,
        FramePower::SinglePhase(watts) => watts,
    };

    let sensor_name = identity
        .name(frame.sensor_index)
        .ok_or(FrameError::UnknownSensor(frame.sensor_index))?
        .to_string();

    let mut baseline = solar_baseline;
    if identity.is_solar(frame.sensor_index) {
        baseline = watts;
        // The solar sensor idles at a small non-zero value overnight
        if baseline < solar_threshold {
            watts = 0;
        }
    }

    Ok(Reading {
        sensor_index: frame.sensor_index,
        sensor_name,
        net_watts: watts,
        solar_baseline: baseline,
    })
}
