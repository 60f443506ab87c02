use crate::can::Frame;

/// Decode a raw STmin byte as announced in a Flow Control frame.
/// 0x00..=0x7F are milliseconds, 0xF1..=0xF9 are 100 microsecond units.
/// Reserved values must be read as the longest time, 127 ms.
pub fn decode_st_min(raw: u8) -> std::time::Duration {
    match raw {
        0x00..=0x7f => std::time::Duration::from_millis(raw as u64),
        0xf1..=0xf9 => std::time::Duration::from_micros((raw as u64 - 0xf0) * 100),
        _ => std::time::Duration::from_millis(0x7f),
    }
}

#[derive(Debug, Copy, Clone)]
pub struct FlowControlConfig {
    pub block_size: u8,
    pub separation_time_min: std::time::Duration,
}

impl TryFrom<&Frame> for FlowControlConfig {
    type Error = crate::error::Error;
    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        if frame.data.len() < 3 {
            return Err(crate::isotp::error::Error::MalformedFrame.into());
        }

        Ok(Self {
            block_size: frame.data[1],
            separation_time_min: decode_st_min(frame.data[2]),
        })
    }
}
