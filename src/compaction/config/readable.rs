// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Small human-readable newtypes for durations and byte sizes in config
//! properties, e.g. `"5m"` or `"4GB"`.

use std::{fmt, str::FromStr, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadableDuration(pub Duration);

impl Default for ReadableDuration {
    fn default() -> Self {
        ReadableDuration(Duration::from_secs(5 * 60))
    }
}

impl ReadableDuration {
    pub fn as_millis_u64(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl FromStr for ReadableDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num_part, unit) = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .map(|idx| s.split_at(idx))
            .ok_or_else(|| format!("missing time unit in duration '{}'", s))?;

        let value: f64 = num_part
            .parse()
            .map_err(|_| format!("invalid numeric duration '{}'", s))?;

        let millis = match unit {
            "ms" => value,
            "s" => value * 1000.0,
            "m" => value * 1000.0 * 60.0,
            "h" => value * 1000.0 * 60.0 * 60.0,
            "d" => value * 1000.0 * 60.0 * 60.0 * 24.0,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, s)),
        };

        Ok(ReadableDuration(Duration::from_millis(millis as u64)))
    }
}

impl fmt::Display for ReadableDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

impl Serialize for ReadableDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReadableDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ReadableDuration::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }

    pub fn gb(n: u64) -> Self {
        ReadableSize(n * 1024 * 1024 * 1024)
    }

    pub fn mb(n: u64) -> Self {
        ReadableSize(n * 1024 * 1024)
    }
}

impl FromStr for ReadableSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num_part, unit) = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .map(|idx| s.split_at(idx))
            .ok_or_else(|| format!("missing size unit in '{}'", s))?;

        let value: f64 = num_part
            .parse()
            .map_err(|_| format!("invalid numeric size '{}'", s))?;

        let bytes = match unit.to_ascii_uppercase().as_str() {
            "B" => value,
            "KB" => value * 1024.0,
            "MB" => value * 1024.0 * 1024.0,
            "GB" => value * 1024.0 * 1024.0 * 1024.0,
            other => return Err(format!("unknown size unit '{}' in '{}'", other, s)),
        };

        Ok(ReadableSize(bytes as u64))
    }
}
