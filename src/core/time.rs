use super::value::MetaValue;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// How the sink stores `rx_time` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Device timestamp written verbatim
    #[default]
    Absolute,
    /// Host time at the first sample plus the device-reported delta
    Relative,
}

/// Device time as whole seconds plus a fractional part in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSpec {
    pub secs: u64,
    pub frac: f64,
}

impl TimeSpec {
    pub fn new(secs: u64, frac: f64) -> Self {
        Self { secs, frac }.normalized()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.frac
    }

    /// Shift by a signed number of seconds.
    pub fn offset_by(&self, delta: f64) -> Self {
        let whole = delta.floor();
        let mut frac = self.frac + (delta - whole);
        let mut secs = self.secs as i128 + whole as i128;
        if frac >= 1.0 {
            frac -= 1.0;
            secs += 1;
        }
        if secs < 0 {
            return Self::default();
        }
        Self::new(secs as u64, frac)
    }

    /// Signed difference `self - earlier` in seconds.
    pub fn seconds_since(&self, earlier: &TimeSpec) -> f64 {
        let whole = self.secs as i128 - earlier.secs as i128;
        whole as f64 + (self.frac - earlier.frac)
    }

    fn normalized(mut self) -> Self {
        if !self.frac.is_finite() || self.frac < 0.0 {
            self.frac = 0.0;
        }
        if self.frac >= 1.0 {
            let carry = self.frac.floor();
            self.secs = self.secs.saturating_add(carry as u64);
            self.frac -= carry;
        }
        self
    }

    /// Parse a `[secs, frac]` tag payload.
    pub fn from_value(value: &MetaValue) -> Result<Self> {
        let items = value
            .as_list()
            .map_err(|_| Error::type_mismatch("rx_time", "[secs, frac] pair"))?;
        match items {
            [secs, frac] => Ok(Self::new(secs.as_u64()?, frac.as_number()?)),
            _ => Err(Error::type_mismatch("rx_time", "[secs, frac] pair")),
        }
    }

    pub fn to_value(&self) -> MetaValue {
        MetaValue::List(vec![MetaValue::UInt64(self.secs), MetaValue::Float64(self.frac)])
    }

    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        let secs = dt.timestamp().max(0) as u64;
        Self::new(secs, dt.timestamp_subsec_nanos() as f64 / 1e9)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let nanos = ((self.frac * 1e9).round() as u32).min(999_999_999);
        DateTime::from_timestamp(self.secs as i64, nanos).unwrap_or_default()
    }

    /// ISO-8601 UTC with a `Z` suffix and only as many fraction digits as needed.
    pub fn to_iso8601(&self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Parse an ISO-8601 timestamp. A missing zone is taken as UTC.
    pub fn parse_iso8601(text: &str) -> Result<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self::from_datetime(&dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Self::from_datetime(&naive.and_utc()))
            .map_err(|_| Error::type_mismatch(text, "ISO-8601 timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_roundtrip() {
        let t = TimeSpec::new(1_500_000_000, 0.25);
        let iso = t.to_iso8601();
        assert_eq!(iso, "2017-07-14T02:40:00.250Z");
        assert_eq!(TimeSpec::parse_iso8601(&iso).unwrap(), t);
    }

    #[test]
    fn test_parse_without_zone() {
        let t = TimeSpec::parse_iso8601("2017-07-14T02:40:00.5").unwrap();
        assert_eq!(t, TimeSpec::new(1_500_000_000, 0.5));
        assert!(TimeSpec::parse_iso8601("yesterday").is_err());
    }

    #[test]
    fn test_value_roundtrip_and_errors() {
        let t = TimeSpec::new(12, 0.5);
        assert_eq!(TimeSpec::from_value(&t.to_value()).unwrap(), t);
        assert!(TimeSpec::from_value(&MetaValue::UInt64(3)).is_err());
        assert!(TimeSpec::from_value(&MetaValue::List(vec![MetaValue::UInt64(1)])).is_err());
    }

    #[test]
    fn test_offset_by_negative_borrows() {
        let t = TimeSpec::new(10, 0.25);
        let shifted = t.offset_by(-0.5);
        assert_eq!(shifted.secs, 9);
        assert!((shifted.frac - 0.75).abs() < 1e-12);
        assert!((shifted.seconds_since(&t) + 0.5).abs() < 1e-12);
    }
}
