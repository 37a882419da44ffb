//! Unit-suffixed time and memory quantities.
//!
//! Suffixes are multiplicative and may be stacked: `"2s"`, `"500m"` (milliseconds),
//! `"1.5G"`, `"1KK"` (a mebibyte). A bare number means seconds or bytes.

use std::time::Duration;

use anyhow::{ensure, Context as _, Result};

fn time_modifier(c: char) -> Option<f64> {
    let m = match c {
        'W' => 60.0 * 60.0 * 24.0 * 7.0,
        'D' => 60.0 * 60.0 * 24.0,
        'H' => 60.0 * 60.0,
        'M' => 60.0,
        's' => 1.0,
        'm' => 1e-3,
        'µ' | 'u' => 1e-6,
        'n' => 1e-9,
        _ => return None,
    };
    Some(m)
}

fn memory_modifier(c: char) -> Option<f64> {
    let m: u64 = match c {
        'b' | 'B' => 1,
        'k' | 'K' => 1 << 10,
        'm' | 'M' => 1 << 20,
        'g' | 'G' => 1 << 30,
        't' | 'T' => 1 << 40,
        'p' | 'P' => 1 << 50,
        _ => return None,
    };
    Some(m as f64)
}

fn parse_with_modifiers(s: &str, modifiers: fn(char) -> Option<f64>) -> Result<f64> {
    let mut number = s.trim();
    let mut modifier = 1.0;
    while let Some(c) = number.chars().next_back() {
        match modifiers(c) {
            Some(m) => {
                modifier *= m;
                number = &number[..number.len() - c.len_utf8()];
            }
            None => break,
        }
    }
    let value: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid quantity: {:?}", s))?;
    let value = value * modifier;
    ensure!(value.is_finite() && value >= 0.0, "invalid quantity: {:?}", s);
    Ok(value)
}

pub fn parse_time(s: &str) -> Result<Duration> {
    let secs = parse_with_modifiers(s, time_modifier)?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("time out of range: {:?}", s))
}

pub fn unparse_time(d: Duration) -> String {
    format!("{}s", d.as_secs_f64())
}

pub fn parse_memory(s: &str) -> Result<u64> {
    let bytes = parse_with_modifiers(s, memory_modifier)?;
    Ok(bytes.round() as u64)
}

pub fn unparse_memory(bytes: u64) -> String {
    format!("{}b", bytes)
}

pub fn parse_bool(s: &str) -> bool {
    !matches!(s.trim().to_lowercase().as_str(), "false" | "no" | "0")
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Raw {
    Integer(u64),
    Float(f64),
    Text(String),
}

/// serde adapter for `Option<Duration>` fields written as `"2s"`.
pub mod serde_time {
    use super::{parse_time, unparse_time, Raw};

    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_str(&unparse_time(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<Raw> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(Raw::Integer(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Float(secs)) => match Duration::try_from_secs_f64(secs) {
                Ok(d) => Ok(Some(d)),
                Err(_) => Err(de::Error::custom(format!("invalid time: {}", secs))),
            },
            Some(Raw::Text(s)) => parse_time(&s).map(Some).map_err(de::Error::custom),
        }
    }
}

/// serde adapter for `Option<u64>` byte counts written as `"256M"`.
pub mod serde_memory {
    use super::{parse_memory, unparse_memory, Raw};

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_str(&unparse_memory(*b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        let raw: Option<Raw> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(Raw::Integer(bytes)) => Ok(Some(bytes)),
            Some(Raw::Float(bytes)) if bytes.is_finite() && bytes >= 0.0 => {
                Ok(Some(bytes.round() as u64))
            }
            Some(Raw::Float(bytes)) => {
                Err(de::Error::custom(format!("invalid memory: {}", bytes)))
            }
            Some(Raw::Text(s)) => parse_memory(&s).map(Some).map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_suffixes() {
        assert_eq!(parse_time("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_time("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_time("500m").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_time("1M").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_time("1D").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_time("1W").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_time(" 1.5s ").unwrap(), Duration::from_millis(1500));
        assert!(parse_time("fast").is_err());
        assert!(parse_time("-1s").is_err());
        assert!(parse_time("1e300s").is_err());
        assert!(parse_time("1e30W").is_err());
    }

    #[test]
    fn memory_suffixes() {
        assert_eq!(parse_memory("123").unwrap(), 123);
        assert_eq!(parse_memory("1b").unwrap(), 1);
        assert_eq!(parse_memory("1K").unwrap(), 1024);
        assert_eq!(parse_memory("256M").unwrap(), 256 << 20);
        assert_eq!(parse_memory("1.5g").unwrap(), 3 << 29);
        assert_eq!(parse_memory("1KK").unwrap(), 1 << 20);
        assert_eq!(parse_memory("2P").unwrap(), 2 << 50);
    }

    #[test]
    fn unparse() {
        assert_eq!(unparse_time(Duration::from_millis(1500)), "1.5s");
        assert_eq!(unparse_memory(42), "42b");
    }

    #[test]
    fn bools() {
        assert!(parse_bool("yes"));
        assert!(!parse_bool(" No"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn serde_adapters() {
        #[derive(serde::Deserialize)]
        struct Limits {
            #[serde(default, with = "serde_time")]
            time: Option<Duration>,
            #[serde(default, with = "serde_memory")]
            memory: Option<u64>,
        }

        let l: Limits = serde_json::from_str(r#"{"time": "250m", "memory": "1K"}"#).unwrap();
        assert_eq!(l.time, Some(Duration::from_millis(250)));
        assert_eq!(l.memory, Some(1024));

        let l: Limits = serde_json::from_str(r#"{"time": 3}"#).unwrap();
        assert_eq!(l.time, Some(Duration::from_secs(3)));
        assert_eq!(l.memory, None);

        assert!(serde_json::from_str::<Limits>(r#"{"time": 1e300}"#).is_err());
        assert!(serde_json::from_str::<Limits>(r#"{"time": "1e300s"}"#).is_err());
    }
}
