use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StoredResponse;

/// A named bucket and the responses stored in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedBucket {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, StoredResponse>,
}

impl CachedBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, url: &str) -> Option<&StoredResponse> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, url: impl Into<String>, response: StoredResponse) {
        self.entries.insert(url.into(), response);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.created_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Covers clock skew too
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_bucket_age_display() {
        let mut bucket = CachedBucket::new("piko-cache-v1");
        assert_eq!(bucket.age_display(), "just now");

        bucket.created_at = Utc::now() - Duration::minutes(5);
        assert_eq!(bucket.age_display(), "5m ago");

        bucket.created_at = Utc::now() - Duration::hours(3);
        assert_eq!(bucket.age_display(), "3h ago");

        bucket.created_at = Utc::now() - Duration::days(2);
        assert_eq!(bucket.age_display(), "2d ago");
    }

    #[test]
    fn test_bucket_clock_skew_is_just_now() {
        let mut bucket = CachedBucket::new("piko-cache-v1");
        bucket.created_at = Utc::now() + Duration::minutes(10);
        assert_eq!(bucket.age_display(), "just now");
    }

    #[test]
    fn test_bucket_insert_and_get() {
        let mut bucket = CachedBucket::new("piko-cache-v1");
        assert!(bucket.is_empty());
        bucket.insert("./index.html", StoredResponse::new("./index.html", 200, "<html>"));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get("./index.html").map(|r| r.status), Some(200));
        assert!(bucket.get("./").is_none());
    }
}
