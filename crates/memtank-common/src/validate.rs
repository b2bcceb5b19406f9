//! Input validators
//!
//! Reject invalid values at the point of use so they never reach the
//! registry.

use std::time::Duration;

use crate::error::{Error, Result};

/// Require a strictly positive integer
pub fn int_positive(field: &str, value: i64) -> Result<()> {
    if value < 1 {
        return Err(Error::NotPositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Convert a duration to whole seconds that fit the 32-bit timestamp space
pub fn whole_secs(field: &str, value: Duration) -> Result<u32> {
    if value.subsec_nanos() != 0 {
        return Err(Error::InvalidDuration {
            value: humantime::format_duration(value).to_string(),
            reason: format!("{field} must be a whole number of seconds"),
        });
    }
    u32::try_from(value.as_secs()).map_err(|_| Error::InvalidDuration {
        value: humantime::format_duration(value).to_string(),
        reason: format!("{field} does not fit in 32-bit seconds"),
    })
}

/// Convert a duration to whole, strictly positive seconds
pub fn positive_secs(field: &str, value: Duration) -> Result<u32> {
    let secs = whole_secs(field, value)?;
    int_positive(field, i64::from(secs))?;
    Ok(secs)
}
