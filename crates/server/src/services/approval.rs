//! Report approval rules.

use serde::{Deserialize, Serialize};

use crate::{
    db::models::{ChatMessage, Role},
    error::{AppError, Result},
    middleware::auth::AuthUser,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn of(approved: Option<bool>) -> Self {
        match approved {
            None => ReportStatus::Pending,
            Some(true) => ReportStatus::Approved,
            Some(false) => ReportStatus::Rejected,
        }
    }
}

/// Checks that `reviewer` may decide `message`, whose author is assigned to
/// `author_supervisor`. Only pending reports can be decided, and only by the
/// author's own supervisor.
pub fn check_review(
    message: &ChatMessage,
    author_supervisor: Option<&str>,
    reviewer: &AuthUser,
) -> Result<()> {
    if !message.is_report {
        return Err(AppError::Validation(
            "Only reports can be approved or rejected".to_string(),
        ));
    }
    if message.author_id == reviewer.id {
        return Err(AppError::Forbidden(
            "You cannot review your own report".to_string(),
        ));
    }
    if reviewer.role != Role::Supervisor || author_supervisor != Some(reviewer.id.as_str()) {
        return Err(AppError::Forbidden(
            "Only the author's supervisor can review this report".to_string(),
        ));
    }
    if ReportStatus::of(message.approved) != ReportStatus::Pending {
        return Err(AppError::Conflict(
            "Report has already been reviewed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(author: &str, approved: Option<bool>) -> ChatMessage {
        ChatMessage {
            id: "m-1".to_string(),
            author_id: author.to_string(),
            content: "weekly report".to_string(),
            reply_to_id: None,
            is_report: true,
            approved,
            reviewed_by: None,
            reviewed_at: None,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn user(id: &str, role: Role) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: id.to_string(),
            role,
        }
    }

    #[test]
    fn assigned_supervisor_may_review_pending_report() {
        let msg = report("student", None);
        assert!(check_review(&msg, Some("sup"), &user("sup", Role::Supervisor)).is_ok());
    }

    #[test]
    fn other_supervisor_is_forbidden() {
        let msg = report("student", None);
        let err = check_review(&msg, Some("sup"), &user("other", Role::Supervisor)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn admin_is_not_the_assigned_supervisor() {
        let msg = report("student", None);
        let err = check_review(&msg, Some("admin"), &user("admin", Role::Admin)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn author_cannot_review_own_report() {
        let msg = report("sup", None);
        let err = check_review(&msg, Some("sup"), &user("sup", Role::Supervisor)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn decided_report_conflicts() {
        let msg = report("student", Some(false));
        let err = check_review(&msg, Some("sup"), &user("sup", Role::Supervisor)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn plain_message_is_not_reviewable() {
        let mut msg = report("student", None);
        msg.is_report = false;
        let err = check_review(&msg, Some("sup"), &user("sup", Role::Supervisor)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn status_from_tri_state() {
        assert_eq!(ReportStatus::of(None), ReportStatus::Pending);
        assert_eq!(ReportStatus::of(Some(true)), ReportStatus::Approved);
        assert_eq!(ReportStatus::of(Some(false)), ReportStatus::Rejected);
    }
}
