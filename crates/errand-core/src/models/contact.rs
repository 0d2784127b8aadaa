use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Contact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// "Title, Company" with whichever parts are present.
    pub fn affiliation(&self) -> Option<String> {
        let parts: Vec<&str> = [self.title.as_deref(), self.company.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        [
            Some(self.name.as_str()),
            self.email.as_deref(),
            self.company.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        serde_json::from_str(
            r#"{"id": 4, "name": "Ada Lovelace", "email": "ada@example.com", "phone": null, "company": "Analytical Engines", "title": "Engineer", "created_at": "2025-01-01T00:00:00Z"}"#,
        )
        .expect("Failed to parse contact JSON")
    }

    #[test]
    fn test_affiliation() {
        assert_eq!(contact().affiliation().as_deref(), Some("Engineer, Analytical Engines"));

        let mut bare = contact();
        bare.title = None;
        bare.company = Some(String::new());
        assert_eq!(bare.affiliation(), None);
    }

    #[test]
    fn test_matches_ignores_case() {
        let c = contact();
        assert!(c.matches("LOVELACE"));
        assert!(c.matches("engines"));
        assert!(!c.matches("babbage"));
    }
}
