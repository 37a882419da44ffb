//! Resource ceilings of a command or task.
//!
//! Every field is optional, an absent value means unbounded.
//! Merging two `Limits` with [`Limits::update`] always tightens.

use arbiter_utils::units::{serde_memory, serde_time, unparse_memory, unparse_time};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    #[serde(with = "serde_time", skip_serializing_if = "Option::is_none")]
    cpu_time: Option<Duration>,

    #[serde(with = "serde_time", skip_serializing_if = "Option::is_none")]
    real_time: Option<Duration>,

    #[serde(with = "serde_memory", skip_serializing_if = "Option::is_none")]
    memory: Option<u64>, // bytes

    #[serde(with = "serde_time", skip_serializing_if = "Option::is_none")]
    gpu_time: Option<Duration>,

    #[serde(with = "serde_memory", skip_serializing_if = "Option::is_none")]
    gpu_memory: Option<u64>, // bytes

    #[serde(skip_serializing_if = "Option::is_none")]
    cores: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pids: Option<u32>,
}

fn min_present<T: Ord>(lhs: Option<T>, rhs: Option<T>) -> Option<T> {
    match (lhs, rhs) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

macro_rules! limit_field {
    ($field:ident, $set:ident, $update:ident, $with:ident, $ty:ty) => {
        pub fn $field(&self) -> Option<$ty> {
            self.$field
        }

        pub fn $set(&mut self, value: Option<$ty>) {
            self.$field = value;
        }

        pub fn $update(&mut self, value: Option<$ty>) {
            self.$field = min_present(self.$field, value);
        }

        pub fn $with(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

impl Limits {
    limit_field!(cpu_time, set_cpu_time, update_cpu_time, with_cpu_time, Duration);
    limit_field!(real_time, set_real_time, update_real_time, with_real_time, Duration);
    limit_field!(memory, set_memory, update_memory, with_memory, u64);
    limit_field!(gpu_time, set_gpu_time, update_gpu_time, with_gpu_time, Duration);
    limit_field!(gpu_memory, set_gpu_memory, update_gpu_memory, with_gpu_memory, u64);
    limit_field!(cores, set_cores, update_cores, with_cores, u32);
    limit_field!(pids, set_pids, update_pids, with_pids, u32);

    /// Pointwise minimum of the present values.
    pub fn update(&mut self, other: &Limits) {
        self.update_cpu_time(other.cpu_time);
        self.update_real_time(other.real_time);
        self.update_memory(other.memory);
        self.update_gpu_time(other.gpu_time);
        self.update_gpu_memory(other.gpu_memory);
        self.update_cores(other.cores);
        self.update_pids(other.pids);
    }

    pub fn merged(mut self, other: &Limits) -> Self {
        self.update(other);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Limits::default()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let times = [
            ("cpu_time", self.cpu_time),
            ("real_time", self.real_time),
            ("gpu_time", self.gpu_time),
        ];
        for (key, value) in times.iter() {
            if let Some(d) = value {
                map.insert((*key).to_owned(), unparse_time(*d));
            }
        }
        let sizes = [("memory", self.memory), ("gpu_memory", self.gpu_memory)];
        for (key, value) in sizes.iter() {
            if let Some(b) = value {
                map.insert((*key).to_owned(), unparse_memory(*b));
            }
        }
        if let Some(cores) = self.cores {
            map.insert("cores".to_owned(), cores.to_string());
        }
        if let Some(pids) = self.pids {
            map.insert("pids".to_owned(), pids.to_string());
        }
        map
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.to_map();
        if map.is_empty() {
            return f.write_str("unbounded");
        }
        let mut first = true;
        for (key, value) in &map {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_takes_minimum() {
        let a = Limits::default()
            .with_cpu_time(Duration::from_secs(2))
            .with_memory(256 << 20);
        let b = Limits::default()
            .with_cpu_time(Duration::from_secs(1))
            .with_real_time(Duration::from_secs(5))
            .with_memory(512 << 20);

        let m = a.merged(&b);
        assert_eq!(m.cpu_time(), Some(Duration::from_secs(1)));
        assert_eq!(m.real_time(), Some(Duration::from_secs(5)));
        assert_eq!(m.memory(), Some(256 << 20));
        assert_eq!(m.pids(), None);

        // symmetric
        assert_eq!(b.merged(&a), m);
    }

    #[test]
    fn empty_stays_empty() {
        let m = Limits::default().merged(&Limits::default());
        assert!(m.is_empty());
        assert_eq!(m.to_string(), "unbounded");
    }

    #[test]
    fn from_toml() {
        let l: Limits = toml::from_str("cpu_time = \"500m\"\nmemory = \"64M\"\npids = 4").unwrap();
        assert_eq!(l.cpu_time(), Some(Duration::from_millis(500)));
        assert_eq!(l.memory(), Some(64 << 20));
        assert_eq!(l.pids(), Some(4));
        assert_eq!(l.to_string(), "cpu_time=0.5s memory=67108864b pids=4");
    }
}
