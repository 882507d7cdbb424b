use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Date-plus-increment identifier of a build, written `YYYYMMDD[.N]`.
///
/// Build ids order by date first, then by increment. The increment defaults
/// to zero when omitted, but is always printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId {
    /// Build date
    pub date: NaiveDate,

    /// Build number within the day
    pub increment: u32,
}

impl BuildId {
    /// Create a build id from its parts.
    pub fn new(date: NaiveDate, increment: u32) -> Self {
        Self { date, increment }
    }
}

impl FromStr for BuildId {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidField {
            field: "buildid",
            reason: format!("{reason}: '{text}'"),
        };

        let mut fields = text.split('.');
        let date = fields.next().unwrap_or_default();
        let increment = fields.next();
        if fields.next().is_some() {
            return Err(invalid("the build id should match YYYYMMDD[.N]"));
        }

        // chrono is lenient about digit counts, so check the shape first
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("the date should match YYYYMMDD"));
        }
        let date = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|_| invalid("the date is not a valid calendar date"))?;

        let increment = match increment {
            Some(increment) => increment
                .parse::<u32>()
                .map_err(|_| invalid("the increment should be a positive integer"))?,
            None => 0,
        };

        Ok(Self { date, increment })
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.date.format("%Y%m%d"), self.increment)
    }
}

impl Serialize for BuildId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BuildId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_only() {
        let buildid: BuildId = "20181105".parse().unwrap();
        assert_eq!(buildid.date, NaiveDate::from_ymd_opt(2018, 11, 5).unwrap());
        assert_eq!(buildid.increment, 0);
    }

    #[test]
    fn test_parse_with_increment() {
        let buildid: BuildId = "20190211.1".parse().unwrap();
        assert_eq!(buildid.date, NaiveDate::from_ymd_opt(2019, 2, 11).unwrap());
        assert_eq!(buildid.increment, 1);
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["20181105", "20190211.1", "20200229.42", "19991231.0"] {
            let buildid: BuildId = text.parse().unwrap();
            assert_eq!(buildid.to_string().parse::<BuildId>().unwrap(), buildid);
        }
        assert_eq!("20181105".parse::<BuildId>().unwrap().to_string(), "20181105.0");
    }

    #[test]
    fn test_invalid() {
        for text in [
            "",
            "2018110",
            "201811050",
            "20181305",
            "20190230",
            "20181105.",
            "20181105.-1",
            "20181105.x",
            "20181105.1.2",
            "2018-11-05",
        ] {
            assert!(
                matches!(
                    text.parse::<BuildId>(),
                    Err(Error::InvalidField { field: "buildid", .. })
                ),
                "Expected '{text}' to be invalid"
            );
        }
    }

    #[test]
    fn test_ordering() {
        let a: BuildId = "20200101".parse().unwrap();
        let b: BuildId = "20200101.1".parse().unwrap();
        let c: BuildId = "20200102".parse().unwrap();

        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, "20200101.0".parse().unwrap());
    }
}
