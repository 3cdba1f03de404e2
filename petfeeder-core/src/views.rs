//! Read-only views derived from store contents at call time.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::models::{Device, FeedingHistory, Schedule};
use crate::store::StoreHandle;

/// Number of upcoming schedules shown by default.
pub const DEFAULT_UPCOMING_WINDOW: usize = 2;

/// Days covered by [`daily_totals`].
pub const DAILY_TOTAL_DAYS: i64 = 7;

/// Schedules after `now`, soonest first, at most `window` of them.
pub fn upcoming(store: &StoreHandle<Schedule>, now: DateTime<Utc>, window: usize) -> Vec<Schedule> {
    store.select_window(|s| s.is_upcoming(now), 0, window)
}

/// Grams fed per day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub grams: u32,
}

/// Grams per calendar day in `tz` for the last seven days ending `today`
/// (also a `tz` date), oldest first. Days without feedings are included with
/// zero.
pub fn daily_totals<Tz: TimeZone>(
    entries: &[FeedingHistory],
    today: NaiveDate,
    tz: &Tz,
) -> Vec<DailyTotal> {
    (0..DAILY_TOTAL_DAYS)
        .rev()
        .map(|back| {
            let date = today - Duration::days(back);
            let grams = entries
                .iter()
                .filter(|e| e.time.with_timezone(tz).date_naive() == date)
                .map(|e| e.amount)
                .sum();
            DailyTotal { date, grams }
        })
        .collect()
}

/// Devices with their online flag as of `now`.
pub fn online_status(devices: &StoreHandle<Device>, now: DateTime<Utc>) -> Vec<(Device, bool)> {
    devices
        .snapshot()
        .into_iter()
        .map(|d| {
            let online = d.is_online(now);
            (d, online)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceStatus;
    use crate::store::ChangeEvent;

    fn schedule(id: &str, time: DateTime<Utc>) -> Schedule {
        Schedule {
            schedule_id: id.to_string(),
            device_id: "D1".to_string(),
            user_id: "u1".to_string(),
            time,
            amount: 10,
            created_at: None,
        }
    }

    #[test]
    fn test_upcoming_recomputed_from_store() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let store = StoreHandle::default();
        store.seed(vec![
            schedule("a", now - Duration::hours(1)),
            schedule("b", now + Duration::hours(3)),
            schedule("c", now + Duration::hours(1)),
            schedule("d", now + Duration::hours(5)),
        ]);

        let ids: Vec<_> = upcoming(&store, now, DEFAULT_UPCOMING_WINDOW)
            .into_iter()
            .map(|s| s.schedule_id)
            .collect();
        assert_eq!(ids, vec!["c", "b"]);

        store.apply(ChangeEvent::Insert(schedule("e", now + Duration::minutes(30))));
        let ids: Vec<_> = upcoming(&store, now, DEFAULT_UPCOMING_WINDOW)
            .into_iter()
            .map(|s| s.schedule_id)
            .collect();
        assert_eq!(ids, vec!["e", "c"]);

        let later = now + Duration::hours(2);
        assert_eq!(upcoming(&store, later, 5).len(), 2);
    }

    #[test]
    fn test_daily_totals_oldest_first() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();
        let at = |d: u32, h: u32| Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap();
        let mut a = FeedingHistory::manual("D1", 10);
        a.time = at(7, 8);
        let mut b = FeedingHistory::manual("D1", 15);
        b.time = at(7, 18);
        let mut c = FeedingHistory::manual("D1", 20);
        c.time = at(3, 9);
        let mut old = FeedingHistory::manual("D1", 99);
        old.time = at(1, 9);

        let totals = daily_totals(&[a, b, c, old], today, &Utc);
        assert_eq!(totals.len(), 7);
        assert_eq!(totals[0].date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(totals[0].grams, 99);
        assert_eq!(totals[2].grams, 20);
        assert_eq!(totals[6].grams, 25);
        assert_eq!(totals[5].grams, 0);
    }

    #[test]
    fn test_daily_totals_use_local_day() {
        let tz = chrono::FixedOffset::west_opt(5 * 3600).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();
        // 02:00 UTC on the 7th is still the evening of the 6th at UTC-5.
        let mut late = FeedingHistory::manual("D1", 30);
        late.time = Utc.with_ymd_and_hms(2025, 6, 7, 2, 0, 0).unwrap();

        let totals = daily_totals(&[late], today, &tz);
        assert_eq!(totals[5].date, NaiveDate::from_ymd_opt(2025, 6, 6).unwrap());
        assert_eq!(totals[5].grams, 30);
        assert_eq!(totals[6].grams, 0);
    }

    #[test]
    fn test_online_status() {
        let now = Utc::now();
        let store = StoreHandle::default();
        let mut fresh = Device::new("D1", "u1", "Kitchen");
        fresh.last_status = DeviceStatus {
            last_update: Some(now - Duration::minutes(2)),
            ..DeviceStatus::default()
        };
        let mut stale = Device::new("D2", "u1", "Hall");
        stale.last_status.last_update = Some(now - Duration::minutes(10));
        store.seed(vec![fresh, stale, Device::new("D3", "u1", "Porch")]);

        let status: Vec<_> = online_status(&store, now)
            .into_iter()
            .map(|(d, online)| (d.device_id, online))
            .collect();
        assert!(status.contains(&("D1".to_string(), true)));
        assert!(status.contains(&("D2".to_string(), false)));
        assert!(status.contains(&("D3".to_string(), false)));
    }
}
