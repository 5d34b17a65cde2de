//! BlackHole Driver
//!
//! Accepts every write and never returns anything. Useful to switch caching
//! off without touching calling code.

use chrono::{DateTime, Utc};

use crate::driver::{Driver, Record};
use crate::error::Result;
use crate::value::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct BlackHole;

impl Driver for BlackHole {
    fn is_available() -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "BlackHole"
    }

    fn get_data(&self, _key: &[String]) -> Option<Record> {
        None
    }

    fn store_data(&self, _key: &[String], _data: &Value, _expiration: DateTime<Utc>) -> Result<bool> {
        Ok(true)
    }

    fn clear(&self, _key: Option<&[String]>) -> bool {
        true
    }

    fn purge(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_hole_never_hits() {
        let driver = BlackHole;
        let key = vec!["a".to_string()];

        assert!(driver.store_data(&key, &Value::Int(1), Utc::now()).unwrap());
        assert!(driver.get_data(&key).is_none());
    }
}
