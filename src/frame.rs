use crate::error::FrameError;
use serde_derive::Deserialize;
use std::str::FromStr;

// CurrentCost CC128 XML is documented at currentcost.com/cc128/xml.htm
// A realtime line looks like:
// <msg><src>CC128-v0.11</src><dsb>00089</dsb><time>13:02:39</time><tmpr>18.7</tmpr>
// <sensor>1</sensor><id>01234</id><type>1</type><ch1><watts>00345</watts></ch1></msg>

/// Power carried by one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePower {
    SinglePhase(i64),
    ThreePhase([i64; 3]),
}

/// One realtime telemetry message from the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sensor_index: u32,
    pub power: FramePower,
    pub temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    sensor: Option<String>,
    tmpr: Option<String>,
    ch1: Option<RawChannel>,
    ch2: Option<RawChannel>,
    ch3: Option<RawChannel>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChannel {
    watts: Option<String>,
}

impl RawChannel {
    fn watts(channel: &Option<RawChannel>) -> Option<&str> {
        channel.as_ref().and_then(|c| c.watts.as_deref())
    }
}

impl Frame {
    /// Parses a single line of XML from the monitor.
    ///
    /// All three of `ch1/watts`, `ch2/watts` and `ch3/watts` make a three-phase
    /// frame, otherwise `ch1/watts` is taken as a single-phase reading.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = quick_xml::de::from_str(line.trim())?;

        let sensor = raw.sensor.as_deref().ok_or(FrameError::MissingSensor)?;
        let sensor_index = parse_number("sensor", sensor)?;

        let power = match (
            RawChannel::watts(&raw.ch1),
            RawChannel::watts(&raw.ch2),
            RawChannel::watts(&raw.ch3),
        ) {
            (Some(ch1), Some(ch2), Some(ch3)) => FramePower::ThreePhase([
                parse_number("ch1/watts", ch1)?,
                parse_number("ch2/watts", ch2)?,
                parse_number("ch3/watts", ch3)?,
            ]),
            (Some(ch1), _, _) => FramePower::SinglePhase(parse_number("ch1/watts", ch1)?),
            _ => return Err(FrameError::MissingWatts),
        };

        let temperature = raw.tmpr.and_then(|t| t.trim().parse().ok());

        Ok(Self {
            sensor_index,
            power,
            temperature,
        })
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, FrameError> {
    value
        .trim()
        .parse()
        .map_err(|_| FrameError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}
