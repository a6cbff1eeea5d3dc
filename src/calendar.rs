// sav-arrow - a reader for SPSS system files.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <http://www.gnu.org/licenses/>.

//! Conversion between the SPSS epoch (14 Oct 1582) and Unix-epoch Arrow
//! scalars.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// The SPSS epoch: midnight, 14 October 1582 (the first day of the
/// Gregorian calendar).
pub const EPOCH: NaiveDate = NaiveDate::from_ymd_opt(1582, 10, 14).unwrap();
const EPOCH_DATETIME: NaiveDateTime = EPOCH.and_time(NaiveTime::MIN);

const UNIX_EPOCH: NaiveDate = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
const UNIX_EPOCH_DATETIME: NaiveDateTime = UNIX_EPOCH.and_time(NaiveTime::MIN);

/// Converts a count of seconds since the SPSS epoch into days since the Unix
/// epoch, for `Date`-typed Arrow columns. Returns `None` if the value is out
/// of chrono's representable range.
pub fn seconds_to_unix_days(seconds: f64) -> Option<i32> {
    let offset_days = (seconds / 86_400.0).floor() as i64;
    let date = if offset_days >= 0 {
        EPOCH.checked_add_days(Days::new(offset_days as u64))?
    } else {
        EPOCH.checked_sub_days(Days::new((-offset_days) as u64))?
    };
    let delta = date.signed_duration_since(UNIX_EPOCH);
    i32::try_from(delta.num_days()).ok()
}

/// Converts a count of seconds since the SPSS epoch into microseconds since
/// the Unix epoch, for `Datetime`-typed Arrow columns.
pub fn seconds_to_unix_micros(seconds: f64) -> Option<i64> {
    let whole = seconds.trunc() as i64;
    let frac_micros = ((seconds - seconds.trunc()) * 1_000_000.0).round() as i64;
    let date_time = EPOCH_DATETIME.checked_add_signed(TimeDelta::seconds(whole))?;
    let delta = date_time.signed_duration_since(UNIX_EPOCH_DATETIME);
    delta.num_microseconds()?.checked_add(frac_micros)
}

/// Converts a raw seconds value (e.g. a `DTIME`/`TIME` cell, which has no
/// epoch of its own — it is a plain duration) into microseconds.
pub fn seconds_to_duration_micros(seconds: f64) -> Option<i64> {
    let micros = seconds * 1_000_000.0;
    if micros.is_finite() {
        Some(micros.round() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_the_start_of_the_gregorian_calendar() {
        assert_eq!(EPOCH.to_string(), "1582-10-14");
    }

    #[test]
    fn known_date_converts() {
        // 13_693_017_600 seconds from the SPSS epoch is 2017-01-20.
        let days = seconds_to_unix_days(13_693_017_600.0).unwrap();
        let date = UNIX_EPOCH.checked_add_days(Days::new(days as u64)).unwrap();
        assert_eq!(date.to_string(), "2017-01-20");
    }

    #[test]
    fn datetime_roundtrips_through_unix_epoch() {
        let micros = seconds_to_unix_micros(13_693_017_600.0).unwrap();
        let date_time = UNIX_EPOCH_DATETIME + TimeDelta::microseconds(micros);
        assert_eq!(date_time.to_string(), "2017-01-20 00:00:00");
    }

    #[test]
    fn duration_is_a_plain_unit_conversion() {
        assert_eq!(seconds_to_duration_micros(1.5).unwrap(), 1_500_000);
    }
}
