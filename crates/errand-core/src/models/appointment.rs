use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Appointment {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    /// Physical location or video call link
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Contact ids
    #[serde(default)]
    pub attendees: Vec<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn starts_at(&self) -> Option<chrono::NaiveDateTime> {
        self.date
            .map(|d| d.and_time(self.time.unwrap_or(NaiveTime::MIN)))
    }

    pub fn when_display(&self) -> String {
        match (self.date, self.time) {
            (Some(date), Some(time)) => {
                format!("{} {}", date.format("%a %b %d"), time.format("%H:%M"))
            }
            (Some(date), None) => format!("{} (all day)", date.format("%a %b %d")),
            _ => "Unscheduled".to_string(),
        }
    }

    pub fn is_video_call(&self) -> bool {
        self.location
            .as_deref()
            .is_some_and(|l| l.starts_with("http://") || l.starts_with("https://"))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppointmentDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub attendees: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<i64>>,
}
