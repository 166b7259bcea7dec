use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, UTC};
use nom::{be_u16, be_u32};
use std::cmp;
use super::UNIX_OFFSET;

/// Number of fraction units in one second for the 64-bit timestamp format.
const FRAC: f64 = 4_294_967_296.0;

/// Number of fraction units in one second for the short format.
const SHORT_FRAC: f64 = 65_536.0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
/// A 64-bit NTP timestamp: whole seconds since the prime epoch
/// (1900-01-01) in the upper word, binary fractions of a second in the
/// lower word.
pub struct NTPTimestamp {
  pub seconds: u32,
  pub fraction: u32,
}

named!(pub parse_timestamp<NTPTimestamp>,
  do_parse!(
    seconds: be_u32 >>
    fraction: be_u32 >>
    (NTPTimestamp {
      seconds: seconds,
      fraction: fraction
    }
  ))
);

impl NTPTimestamp {
  /// The current host clock reading.
  pub fn now() -> NTPTimestamp {
    UTC::now().into()
  }

  /// Converts seconds since the Unix epoch into a timestamp.
  ///
  /// The fractional part is split off before the epoch offset is applied,
  /// so none of the sub-microsecond resolution is lost to the magnitude
  /// of the seconds word. A fraction that rounds up to a full second
  /// carries into the seconds word instead of wrapping the fraction.
  pub fn from_unix(unix: f64) -> NTPTimestamp {
    let whole = unix.floor();
    let mut seconds = (whole as i64 + UNIX_OFFSET as i64) as u32;
    let mut fraction = ((unix - whole) * FRAC).round() as u64;
    if fraction >= 1 << 32 {
      seconds = seconds.wrapping_add(1);
      fraction = 0;
    }
    NTPTimestamp {
      seconds: seconds,
      fraction: fraction as u32,
    }
  }

  /// Converts the timestamp into seconds since the Unix epoch.
  pub fn to_unix(&self) -> f64 {
    self.seconds as f64 - UNIX_OFFSET as f64 + self.fraction as f64 / FRAC
  }

  /// Reads a timestamp from eight big-endian bytes at `offset`.
  /// The caller guarantees the buffer covers the window.
  pub fn read(buf: &[u8], offset: usize) -> NTPTimestamp {
    NTPTimestamp {
      seconds: BigEndian::read_u32(&buf[offset..offset + 4]),
      fraction: BigEndian::read_u32(&buf[offset + 4..offset + 8]),
    }
  }

  /// Writes the timestamp as eight big-endian bytes at `offset`,
  /// leaving every byte outside the window untouched.
  pub fn write(&self, buf: &mut [u8], offset: usize) {
    BigEndian::write_u32(&mut buf[offset..offset + 4], self.seconds);
    BigEndian::write_u32(&mut buf[offset + 4..offset + 8], self.fraction);
  }
}

impl From<DateTime<UTC>> for NTPTimestamp {
  fn from(when: DateTime<UTC>) -> NTPTimestamp {
    // chrono represents a leap second as nanos >= 10^9; fold it into the
    // last representable instant of the current second
    let nanos = cmp::min(when.timestamp_subsec_nanos(), 999_999_999) as u64;
    NTPTimestamp {
      seconds: (when.timestamp() + UNIX_OFFSET as i64) as u32,
      fraction: ((nanos << 32) / 1_000_000_000) as u32,
    }
  }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
/// The 32-bit short fixed-point format used by the root delay and root
/// dispersion fields: 16 bits of whole seconds, 16 of fraction.
pub struct NTPShort {
  pub seconds: u16,
  pub fraction: u16,
}

named!(pub parse_short<NTPShort>,
  do_parse!(
    seconds: be_u16 >>
    fraction: be_u16 >>
    (NTPShort {
      seconds: seconds,
      fraction: fraction
    }
  ))
);

impl NTPShort {
  /// Converts a duration in seconds, with the same rounding carry as the
  /// 64-bit format at one sixty-five-thousandth the resolution.
  pub fn from_seconds(secs: f64) -> NTPShort {
    let whole = secs.floor();
    let mut seconds = whole as u16;
    let mut fraction = ((secs - whole) * SHORT_FRAC).round() as u32;
    if fraction >= 1 << 16 {
      seconds = seconds.wrapping_add(1);
      fraction = 0;
    }
    NTPShort {
      seconds: seconds,
      fraction: fraction as u16,
    }
  }

  pub fn to_seconds(&self) -> f64 {
    self.seconds as f64 + self.fraction as f64 / SHORT_FRAC
  }

  /// Writes the value as four big-endian bytes at `offset`.
  pub fn write(&self, buf: &mut [u8], offset: usize) {
    BigEndian::write_u16(&mut buf[offset..offset + 2], self.seconds);
    BigEndian::write_u16(&mut buf[offset + 2..offset + 4], self.fraction);
  }
}
