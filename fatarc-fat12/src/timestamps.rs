// Packed FAT timestamps
// Time is hour/minute/second-halved in 5/6/5 bits, date is
// years-since-1980/month/day in 7/4/5 bits. Both words are little-endian
// on disk; here they are already host-order values.

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};

/// Packs a local datetime into on-disk (date, time) words. Years outside
/// the representable 1980..=2107 window are clamped.
pub fn encode_datetime(dt: &DateTime<Local>) -> (u16, u16) {
    let year = dt.year().clamp(1980, 2107);
    let date = ((year - 1980) as u16) << 9 | (dt.month() as u16) << 5 | dt.day() as u16;
    let time = (dt.hour() as u16) << 11 | (dt.minute() as u16) << 5 | (dt.second() as u16 / 2);
    (date, time)
}

/// Unpacks (date, time) words into a local datetime. Returns `None` for
/// field combinations that are not a real calendar date.
pub fn decode_datetime(date: u16, time: u16) -> Option<DateTime<Local>> {
    let (year, month, day) = unpack_date(date);
    let (hour, minute, second) = unpack_time(time);
    let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
        hour as u32,
        minute as u32,
        second as u32,
    )?;
    Local.from_local_datetime(&naive).single()
}

/// Raw time fields: (hour, minute, second), with the stored half-seconds
/// doubled back to seconds.
pub fn unpack_time(time: u16) -> (u8, u8, u8) {
    (
        (time >> 11) as u8,
        (time >> 5 & 0x3F) as u8,
        ((time & 0x1F) * 2) as u8,
    )
}

/// Raw date fields: (full year, month, day).
pub fn unpack_date(date: u16) -> (u16, u8, u8) {
    (
        1980 + (date >> 9),
        (date >> 5 & 0x0F) as u8,
        (date & 0x1F) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_the_classic_bit_layout() {
        let dt = Local.with_ymd_and_hms(1986, 3, 14, 12, 30, 54).unwrap();
        let (date, time) = encode_datetime(&dt);
        assert_eq!(date, (6 << 9) | (3 << 5) | 14);
        assert_eq!(time, (12 << 11) | (30 << 5) | 27);
        assert_eq!(unpack_date(date), (1986, 3, 14));
        assert_eq!(unpack_time(time), (12, 30, 54));
    }

    #[test]
    fn seconds_round_down_to_two_second_ticks() {
        let dt = Local.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        let (_, time) = encode_datetime(&dt);
        assert_eq!(unpack_time(time).2, 58);
    }

    #[test]
    fn pre_epoch_years_clamp_to_1980() {
        let dt = Local.with_ymd_and_hms(1975, 6, 1, 0, 0, 0).unwrap();
        let (date, _) = encode_datetime(&dt);
        assert_eq!(unpack_date(date).0, 1980);
    }

    #[test]
    fn decode_rejects_impossible_dates() {
        // month 0, day 0
        assert!(decode_datetime(0, 0).is_none());
        let dt = Local.with_ymd_and_hms(1986, 3, 14, 12, 30, 54).unwrap();
        let (date, time) = encode_datetime(&dt);
        let back = decode_datetime(date, time).unwrap();
        assert_eq!(back.year(), 1986);
        assert_eq!(back.second(), 54);
    }
}
