use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Weather region (prefecture) the user lives in, if known.
    pub region_id: Option<String>,
}

/// Body metric names a daily log can answer.
pub mod body_metrics {
    pub const SLEEP_HOURS: &str = "sleep_hours";
    pub const MOOD: &str = "mood";
    pub const FATIGUE: &str = "fatigue";
    pub const WELLBEING_SCORE: &str = "wellbeing_score";

    pub const ALL: [&str; 4] = [SLEEP_HOURS, MOOD, FATIGUE, WELLBEING_SCORE];
}

/// Self-reported wellbeing for one user and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLog {
    pub user_id: i64,
    pub date: NaiveDate,
    pub sleep_hours: Option<f64>,
    pub mood: Option<f64>,
    pub fatigue: Option<f64>,
    pub wellbeing_score: Option<f64>,
}

impl DailyLog {
    pub fn new(user_id: i64, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            sleep_hours: None,
            mood: None,
            fatigue: None,
            wellbeing_score: None,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            body_metrics::SLEEP_HOURS => self.sleep_hours,
            body_metrics::MOOD => self.mood,
            body_metrics::FATIGUE => self.fatigue,
            body_metrics::WELLBEING_SCORE => self.wellbeing_score,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_lookup_by_name() {
        let mut log = DailyLog::new(1, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        log.sleep_hours = Some(5.5);
        log.fatigue = Some(4.0);

        assert_eq!(log.metric("sleep_hours"), Some(5.5));
        assert_eq!(log.metric("fatigue"), Some(4.0));
        assert_eq!(log.metric("mood"), None);
        assert_eq!(log.metric("steps"), None);
    }
}
