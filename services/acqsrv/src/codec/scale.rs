//! Engineering-unit scaling

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{AcqError, Result};

/// Maps a raw numeric value to engineering units and back
pub trait ScaleLaw: Debug + Send + Sync {
    fn to_engineering(&self, raw: f64) -> f64;

    fn to_raw(&self, engineering: f64) -> f64;
}

/// `value = (raw - raw_min) * (max - min) / (raw_max - raw_min) + min`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub raw_min: f64,
    pub raw_max: f64,
}

impl LinearScale {
    pub fn new(min: f64, max: f64, raw_min: f64, raw_max: f64) -> Result<Self> {
        let scale = Self {
            min,
            max,
            raw_min,
            raw_max,
        };
        scale.validate()?;
        Ok(scale)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.min, self.max, self.raw_min, self.raw_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(AcqError::config("Scale bounds must be finite"));
        }
        if self.raw_max == self.raw_min {
            return Err(AcqError::config(format!(
                "Degenerate raw range [{}, {}]",
                self.raw_min, self.raw_max
            )));
        }
        if self.max == self.min {
            return Err(AcqError::config(format!(
                "Degenerate scale range [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl ScaleLaw for LinearScale {
    fn to_engineering(&self, raw: f64) -> f64 {
        (raw - self.raw_min) * (self.max - self.min) / (self.raw_max - self.raw_min) + self.min
    }

    fn to_raw(&self, engineering: f64) -> f64 {
        (engineering - self.min) * (self.raw_max - self.raw_min) / (self.max - self.min)
            + self.raw_min
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_scale_from_zero() {
        // 4000 counts = 0..100 %
        let scale = LinearScale::new(0.0, 100.0, 0.0, 4000.0).unwrap();
        assert_eq!(scale.to_engineering(2000.0), 50.0);
        assert_eq!(scale.to_raw(25.0), 1000.0);
    }

    #[test]
    fn test_linear_scale_offset_range() {
        // 4-20 mA loop mapped to -50..150 degC
        let scale = LinearScale::new(-50.0, 150.0, 4.0, 20.0).unwrap();
        assert_eq!(scale.to_engineering(4.0), -50.0);
        assert_eq!(scale.to_engineering(20.0), 150.0);
        assert!((scale.to_raw(scale.to_engineering(13.7)) - 13.7).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_ranges_rejected() {
        assert!(LinearScale::new(0.0, 100.0, 10.0, 10.0).is_err());
        assert!(LinearScale::new(5.0, 5.0, 0.0, 10.0).is_err());
        assert!(LinearScale::new(0.0, f64::INFINITY, 0.0, 10.0).is_err());
    }
}
