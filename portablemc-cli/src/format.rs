//! Small formatting helpers for the human-readable output.

use std::fmt;

use chrono::TimeDelta;


/// Date format of the search listings.
pub const DATE_FORMAT: &str = "%a %b %e %T %Y";

/// Scale a value down to a metric unit, returning the scaled value and the unit
/// letter (a space when no scaling applies).
pub fn si_unit(value: f32) -> (f32, char) {
    for (scale, unit) in [(1e9, 'G'), (1e6, 'M'), (1e3, 'k')] {
        if value >= scale {
            return (value / scale, unit);
        }
    }
    (value, ' ')
}

/// Rough "N units ago" rendering of a time delta.
#[derive(Debug)]
pub struct Ago(pub TimeDelta);

impl fmt::Display for Ago {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let days = self.0.num_days();
        for (span, unit) in [(365, "year"), (30, "month"), (7, "week"), (1, "day")] {
            let count = days / span;
            if count > 0 {
                let plural = if count > 1 { "s" } else { "" };
                return write!(f, "{count} {unit}{plural} ago");
            }
        }

        let hours = self.0.num_hours();
        if hours > 0 {
            let plural = if hours > 1 { "s" } else { "" };
            return write!(f, "{hours} hour{plural} ago");
        }

        write!(f, "{} minutes ago", self.0.num_minutes())

    }
}

/// Lower case hex rendering of a byte slice, for hashes.
pub struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
