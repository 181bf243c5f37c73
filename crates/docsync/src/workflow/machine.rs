//! The draft lifecycle as a pure transition table plus role guards.
//!
//! | From           | Event   | To        | Guard                                  |
//! |----------------|---------|-----------|----------------------------------------|
//! | Draft          | submit  | InReview  | author                                 |
//! | Rejected       | submit  | InReview  | author                                 |
//! | InReview       | approve | Approved  | elevated role, not the author          |
//! | InReview       | reject  | Rejected  | elevated role                          |
//! | Approved       | publish | Published | elevated role                          |
//! | Draft/Rejected | edit    | Draft     | author                                 |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drafts::DraftStatus;

/// Role of an already-authenticated actor, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    /// True for roles allowed to review and publish.
    pub fn is_elevated(&self) -> bool {
        *self >= Role::Editor
    }
}

/// Who is calling. Identity and role are established by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: Role,
    /// Email used for commit authorship; derived from the id when absent.
    #[serde(default)]
    pub email: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn commit_email(&self) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| format!("{}@users.noreply.docsync", self.id))
    }
}

/// A lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowEvent {
    Submit,
    Approve,
    Reject,
    Publish,
    Edit,
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowEvent::Submit => "submit",
            WorkflowEvent::Approve => "approve",
            WorkflowEvent::Reject => "reject",
            WorkflowEvent::Publish => "publish",
            WorkflowEvent::Edit => "edit",
        })
    }
}

/// Target status of `event` from `from`, or `None` if the table has no such row.
pub fn next_status(from: DraftStatus, event: WorkflowEvent) -> Option<DraftStatus> {
    use DraftStatus::*;
    use WorkflowEvent::*;

    match (from, event) {
        (Draft | Rejected, Submit) => Some(InReview),
        (InReview, Approve) => Some(Approved),
        (InReview, Reject) => Some(Rejected),
        (Approved, Publish) => Some(Published),
        (Draft | Rejected, Edit) => Some(Draft),
        _ => None,
    }
}

/// Checks the role guard of `event` for `actor` on a draft written by `author`.
///
/// Returns the reason on failure.
pub fn check_guard(event: WorkflowEvent, actor: &Actor, author: &str) -> Result<(), String> {
    let is_author = actor.id == author;
    match event {
        WorkflowEvent::Submit | WorkflowEvent::Edit if !is_author => {
            Err(format!("only the author can {} this draft", event))
        }
        WorkflowEvent::Approve | WorkflowEvent::Reject | WorkflowEvent::Publish
            if !actor.role.is_elevated() =>
        {
            Err(format!("{} requires an editor or admin role", event))
        }
        WorkflowEvent::Approve if is_author => {
            Err("authors cannot approve their own draft".to_string())
        }
        _ => Ok(()),
    }
}

/// True if `actor` may delete a draft written by `author`.
pub fn may_delete(actor: &Actor, author: &str) -> bool {
    actor.id == author || actor.role == Role::Admin
}

/// True if a draft in `status` may be deleted at all.
pub fn deletable(status: DraftStatus) -> bool {
    matches!(status, DraftStatus::Draft | DraftStatus::Rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [DraftStatus; 5] = [
        DraftStatus::Draft,
        DraftStatus::InReview,
        DraftStatus::Approved,
        DraftStatus::Rejected,
        DraftStatus::Published,
    ];

    const ALL_EVENTS: [WorkflowEvent; 5] = [
        WorkflowEvent::Submit,
        WorkflowEvent::Approve,
        WorkflowEvent::Reject,
        WorkflowEvent::Publish,
        WorkflowEvent::Edit,
    ];

    #[test]
    fn test_transition_table() {
        use DraftStatus::*;
        use WorkflowEvent::*;

        let allowed = [
            (Draft, Submit, InReview),
            (Rejected, Submit, InReview),
            (InReview, Approve, Approved),
            (InReview, Reject, Rejected),
            (Approved, Publish, Published),
            (Draft, Edit, Draft),
            (Rejected, Edit, Draft),
        ];

        let mut count = 0;
        for from in ALL_STATUSES {
            for event in ALL_EVENTS {
                let expected = allowed
                    .iter()
                    .find(|(f, e, _)| *f == from && *e == event)
                    .map(|(_, _, to)| *to);
                assert_eq!(next_status(from, event), expected, "{:?} {:?}", from, event);
                count += usize::from(expected.is_some());
            }
        }
        assert_eq!(count, allowed.len());
    }

    #[test]
    fn test_published_is_terminal() {
        for event in ALL_EVENTS {
            assert_eq!(next_status(DraftStatus::Published, event), None);
        }
    }

    #[test]
    fn test_guards() {
        let author = Actor::new("ada", Role::Editor);
        let reviewer = Actor::new("bob", Role::Editor);
        let viewer = Actor::new("eve", Role::Viewer);

        assert!(check_guard(WorkflowEvent::Submit, &author, "ada").is_ok());
        assert!(check_guard(WorkflowEvent::Submit, &reviewer, "ada").is_err());
        assert!(check_guard(WorkflowEvent::Edit, &reviewer, "ada").is_err());

        assert!(check_guard(WorkflowEvent::Approve, &reviewer, "ada").is_ok());
        assert!(check_guard(WorkflowEvent::Approve, &author, "ada").is_err());
        assert!(check_guard(WorkflowEvent::Approve, &viewer, "ada").is_err());

        // Rejecting or publishing your own draft is allowed with the role.
        assert!(check_guard(WorkflowEvent::Reject, &author, "ada").is_ok());
        assert!(check_guard(WorkflowEvent::Publish, &author, "ada").is_ok());
        assert!(check_guard(WorkflowEvent::Publish, &viewer, "ada").is_err());
    }

    #[test]
    fn test_delete_rules() {
        assert!(may_delete(&Actor::new("ada", Role::Viewer), "ada"));
        assert!(may_delete(&Actor::new("root", Role::Admin), "ada"));
        assert!(!may_delete(&Actor::new("bob", Role::Editor), "ada"));

        assert!(deletable(DraftStatus::Draft));
        assert!(deletable(DraftStatus::Rejected));
        assert!(!deletable(DraftStatus::InReview));
        assert!(!deletable(DraftStatus::Approved));
        assert!(!deletable(DraftStatus::Published));
    }

    #[test]
    fn test_role_order() {
        assert!(!Role::Viewer.is_elevated());
        assert!(Role::Editor.is_elevated());
        assert!(Role::Admin.is_elevated());
    }
}
