use serde::{Deserialize, Serialize};

/// Bookkeeping for the refresh job, shared by every instance through the
/// cache store. Always written as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub is_updating: bool,
    pub last_attempt: i64,
    /// 0 means the job never succeeded.
    pub last_success: i64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl UpdateStatus {
    /// Announcement written when a refresh starts. Success accounting is
    /// carried over from `previous` untouched.
    pub fn started(previous: &UpdateStatus, timestamp: i64) -> UpdateStatus {
        UpdateStatus {
            is_updating: true,
            last_attempt: timestamp,
            last_success: previous.last_success,
            error_count: previous.error_count,
            last_error: None,
        }
    }

    pub fn succeeded(timestamp: i64) -> UpdateStatus {
        UpdateStatus {
            is_updating: false,
            last_attempt: timestamp,
            last_success: timestamp,
            error_count: 0,
            last_error: None,
        }
    }

    pub fn failed(
        previous: &UpdateStatus,
        timestamp: i64,
        message: String,
    ) -> UpdateStatus {
        UpdateStatus {
            is_updating: false,
            last_attempt: timestamp,
            last_success: previous.last_success,
            error_count: previous.error_count.saturating_add(1),
            last_error: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_carries_last_success() {
        let previous = UpdateStatus::succeeded(1_000);
        let failed = UpdateStatus::failed(&previous, 2_000, "boom".into());
        assert_eq!(failed.last_success, 1_000);
        assert_eq!(failed.error_count, 1);
        assert!(!failed.is_updating);

        let again = UpdateStatus::failed(&failed, 3_000, "boom".into());
        assert_eq!(again.error_count, 2);
        assert_eq!(again.last_success, 1_000);
    }

    #[test]
    fn test_success_resets_errors() {
        let status = UpdateStatus::succeeded(5_000);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.last_success, 5_000);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(UpdateStatus::failed(
            &UpdateStatus::default(),
            7,
            "health check failed".into(),
        ))
        .unwrap();
        assert_eq!(json["isUpdating"], false);
        assert_eq!(json["lastAttempt"], 7);
        assert_eq!(json["lastSuccess"], 0);
        assert_eq!(json["errorCount"], 1);
        assert_eq!(json["lastError"], "health check failed");
    }
}
