use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Countdown {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Countdown {
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_active {
            return 0;
        }
        (self.ends_at - now).num_seconds().max(0)
    }
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct CountdownChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn stopped_countdowns_report_no_time_left() {
        let now = Utc::now();
        let mut countdown = Countdown {
            id: 1,
            title: "Flash sale".to_string(),
            description: None,
            ends_at: now + Duration::minutes(5),
            is_active: false,
            started_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(countdown.remaining_seconds(now), 0);

        countdown.is_active = true;
        assert_eq!(countdown.remaining_seconds(now), 300);
        assert_eq!(countdown.remaining_seconds(now + Duration::minutes(10)), 0);
    }
}
