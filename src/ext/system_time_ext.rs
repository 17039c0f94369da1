use std::time::{Duration, SystemTime};

use bincode::{Decode, Encode};
use derive_more::Display;

/// A point in time relative to the unix epoch, split into whole seconds and
/// the nanosecond remainder. Negative seconds describe instants before 1970.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
#[display("{secs}.{nanos:09}")]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn to_system_time(self) -> SystemTime {
        if self.secs >= 0 {
            SystemTime::UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            SystemTime::UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs())
                + Duration::from_nanos(u64::from(self.nanos))
        }
    }
}

pub trait SystemTimeExt {
    fn to_timestamp(&self) -> Timestamp;
}

impl SystemTimeExt for SystemTime {
    fn to_timestamp(&self) -> Timestamp {
        match self.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(after) => Timestamp {
                secs: after.as_secs() as i64,
                nanos: after.subsec_nanos(),
            },
            Err(err) => {
                let before = err.duration();
                if before.subsec_nanos() == 0 {
                    Timestamp {
                        secs: -(before.as_secs() as i64),
                        nanos: 0,
                    }
                } else {
                    Timestamp {
                        secs: -(before.as_secs() as i64) - 1,
                        nanos: 1_000_000_000 - before.subsec_nanos(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::new(0, 0))]
    #[case(Duration::new(1_700_000_000, 123_456_789))]
    #[case(Duration::new(5, 999_999_999))]
    fn timestamp_after_epoch_matches_duration(#[case] offset: Duration) {
        let time = SystemTime::UNIX_EPOCH + offset;
        let stamp = time.to_timestamp();

        assert_eq!(stamp.secs, offset.as_secs() as i64);
        assert_eq!(stamp.nanos, offset.subsec_nanos());
        assert_eq!(stamp.to_system_time(), time);
    }

    #[test]
    fn timestamp_before_epoch_borrows_a_second() {
        let time = SystemTime::UNIX_EPOCH - Duration::new(2, 250_000_000);
        let stamp = time.to_timestamp();

        assert_eq!(stamp, Timestamp { secs: -3, nanos: 750_000_000 });
        assert_eq!(stamp.to_system_time(), time);
    }

    #[test]
    fn timestamp_display_pads_nanos() {
        let stamp = Timestamp { secs: 12, nanos: 5 };
        assert_eq!(stamp.to_string(), "12.000000005");
    }
}
