//! Clock & Market Calendar (C1)
//!
//! Decides whether the market is open at instant `t` and computes the next
//! open. Time reads are isolated behind a `Clock` trait so tests can inject
//! a fake clock instead of `Utc::now()`.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Asia::Seoul;
use chrono_tz::Tz;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Defaults for [`MarketCalendar::default`], matching spec's configuration
/// surface before any JSON overrides are applied.
pub const MARKET_OPEN_HOUR: u32 = 9;
pub const MARKET_OPEN_MINUTE: u32 = 0;
pub const MARKET_CLOSE_HOUR: u32 = 15;
pub const MARKET_CLOSE_MINUTE: u32 = 30;
pub const MARKET_TZ: Tz = Seoul;

fn parse_hm(s: &str) -> AppResult<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| AppError::InvalidArgument(format!("malformed time {s}, expected HH:MM")))?;
    let h: u32 = h
        .parse()
        .map_err(|_| AppError::InvalidArgument(format!("malformed hour in {s}")))?;
    let m: u32 = m
        .parse()
        .map_err(|_| AppError::InvalidArgument(format!("malformed minute in {s}")))?;
    Ok((h, m))
}

/// Time source abstraction. Production code uses `SystemClock`; tests use
/// `FakeClock` to compress minutes into microseconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock whose instant is set explicitly by the test driving it.
pub struct FakeClock {
    micros: AtomicI64,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.micros.store(at.timestamp_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Duration) {
        self.micros
            .fetch_add(delta.num_microseconds().unwrap_or(0), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
    }
}

/// Market-hours calculator. Open `Mon..=Fri`, `open <= local <= close` in
/// `tz`. No holiday calendar (weekends only — see open question in spec §9).
///
/// The inclusive upper bound at the close minute matches the source
/// system's behavior literally (`!isAfter(MARKET_CLOSE)`); this was called
/// out as an open question in the spec and resolved here per the Open
/// Questions decision recorded in DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct MarketCalendar {
    open_hour: u32,
    open_minute: u32,
    close_hour: u32,
    close_minute: u32,
    tz: Tz,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self {
            open_hour: MARKET_OPEN_HOUR,
            open_minute: MARKET_OPEN_MINUTE,
            close_hour: MARKET_CLOSE_HOUR,
            close_minute: MARKET_CLOSE_MINUTE,
            tz: MARKET_TZ,
        }
    }
}

impl MarketCalendar {
    /// Builds a calendar from the configuration surface's string fields
    /// (`"HH:MM"` open/close, an IANA zone name). Falls back to the
    /// compiled-in KRX defaults on any parse failure so a malformed config
    /// value degrades to the documented default rather than panicking.
    pub fn from_config(open: &str, close: &str, timezone: &str) -> AppResult<Self> {
        let (open_hour, open_minute) = parse_hm(open)?;
        let (close_hour, close_minute) = parse_hm(close)?;
        let tz = Tz::from_str(timezone)
            .map_err(|_| AppError::InvalidArgument(format!("unknown timezone {timezone}")))?;
        Ok(Self {
            open_hour,
            open_minute,
            close_hour,
            close_minute,
            tz,
        })
    }

    pub fn is_open_at(&self, t: DateTime<Utc>) -> bool {
        let local = t.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes_of_day = local.hour() * 60 + local.minute();
        let open = self.open_hour * 60 + self.open_minute;
        let close = self.close_hour * 60 + self.close_minute;
        if minutes_of_day < open || minutes_of_day > close {
            return false;
        }
        if minutes_of_day == close && local.second() > 0 {
            return false;
        }
        true
    }

    /// Next instant (in UTC) at which the market opens. If `t` is already
    /// before today's open and today is a trading day, that's the answer;
    /// otherwise rolls forward a day at a time, skipping weekends.
    pub fn next_open(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let local = t.with_timezone(&self.tz);
        let open_time = chrono::NaiveTime::from_hms_opt(self.open_hour, self.open_minute, 0).unwrap();

        let mut candidate_date = local.date_naive();
        let today_is_trading_day = !matches!(candidate_date.weekday(), Weekday::Sat | Weekday::Sun);
        if !(today_is_trading_day && local.time() < open_time) {
            candidate_date += Duration::days(1);
        }
        while matches!(candidate_date.weekday(), Weekday::Sat | Weekday::Sun) {
            candidate_date += Duration::days(1);
        }

        let candidate_naive = candidate_date
            .and_hms_opt(self.open_hour, self.open_minute, 0)
            .expect("valid market-open time");
        self.tz
            .from_local_datetime(&candidate_naive)
            .single()
            .expect("unambiguous local time")
            .with_timezone(&Utc)
    }

    pub fn open_hour(&self) -> u32 {
        self.open_hour
    }

    pub fn open_minute(&self) -> u32 {
        self.open_minute
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Hour/minute 5 minutes after close, in `self.tz` — the pending-cleanup
    /// cron's firing time, tracking an overridden close instead of a
    /// hardcoded `15:35`.
    pub fn cleanup_hour_minute(&self) -> (u32, u32) {
        let total = self.close_hour * 60 + self.close_minute + 5;
        ((total / 60) % 24, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul_dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        MARKET_TZ
            .from_local_datetime(
                &chrono::NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, s)
                    .unwrap(),
            )
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn open_during_trading_hours() {
        let cal = MarketCalendar::default();
        let t = seoul_dt(2026, 7, 27, 10, 0, 0);
        assert_eq!(t.with_timezone(&MARKET_TZ).weekday(), Weekday::Mon);
        assert!(cal.is_open_at(t));
    }

    #[test]
    fn closed_before_open() {
        let cal = MarketCalendar::default();
        let t = seoul_dt(2026, 7, 27, 8, 59, 59);
        assert!(!cal.is_open_at(t));
    }

    #[test]
    fn open_at_exact_boundaries() {
        let cal = MarketCalendar::default();
        assert!(cal.is_open_at(seoul_dt(2026, 7, 27, 9, 0, 0)));
        assert!(cal.is_open_at(seoul_dt(2026, 7, 27, 15, 30, 0)));
        assert!(!cal.is_open_at(seoul_dt(2026, 7, 27, 15, 30, 1)));
    }

    #[test]
    fn closed_on_weekend() {
        let cal = MarketCalendar::default();
        let saturday = seoul_dt(2026, 7, 25, 10, 0, 0);
        assert!(!cal.is_open_at(saturday));
    }

    #[test]
    fn next_open_skips_weekend() {
        let cal = MarketCalendar::default();
        // Friday after close -> next Monday open
        let friday_after_close = seoul_dt(2026, 7, 31, 16, 0, 0);
        let next = cal.next_open(friday_after_close);
        let next_local = next.with_timezone(&MARKET_TZ);
        assert_eq!(next_local.weekday(), Weekday::Mon);
        assert_eq!(next_local.hour(), MARKET_OPEN_HOUR);
    }

    #[test]
    fn fake_clock_advances() {
        let start = seoul_dt(2026, 7, 27, 9, 0, 0);
        let clock = FakeClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(3));
        assert_eq!(clock.now(), start + Duration::minutes(3));
    }

    #[test]
    fn from_config_parses_overridden_hours() {
        let cal = MarketCalendar::from_config("10:00", "14:00", "Asia/Seoul").unwrap();
        assert!(!cal.is_open_at(seoul_dt(2026, 7, 27, 9, 30, 0)));
        assert!(cal.is_open_at(seoul_dt(2026, 7, 27, 10, 0, 0)));
        assert!(cal.is_open_at(seoul_dt(2026, 7, 27, 14, 0, 0)));
        assert!(!cal.is_open_at(seoul_dt(2026, 7, 27, 14, 0, 1)));
    }

    #[test]
    fn from_config_rejects_malformed_time() {
        assert!(MarketCalendar::from_config("9am", "15:30", "Asia/Seoul").is_err());
    }

    #[test]
    fn from_config_rejects_unknown_timezone() {
        assert!(MarketCalendar::from_config("09:00", "15:30", "Not/AZone").is_err());
    }

    #[test]
    fn cleanup_hour_minute_is_five_past_close() {
        let cal = MarketCalendar::default();
        assert_eq!(cal.cleanup_hour_minute(), (15, 35));
        let cal = MarketCalendar::from_config("09:00", "15:57", "Asia/Seoul").unwrap();
        assert_eq!(cal.cleanup_hour_minute(), (16, 2));
    }
}
