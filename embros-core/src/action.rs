//! Action protocol types and the goal state machine.
//!
//! An action is a long-running exchange built from three service pairs
//! (goal, cancel, result) and two topics (feedback, status). The wire
//! structs here are what those sub-entities carry; [`transition`] encodes
//! the server-side goal state machine.

/// Identifier of one action goal.
pub type GoalUuid = [u8; 16];

/// Status of an action goal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GoalStatus {
    /// Goal status is unknown.
    Unknown = 0,

    /// Goal has been accepted by the action server.
    Accepted = 1,

    /// Goal is currently being executed.
    Executing = 2,

    /// Goal is in the process of being canceled.
    Canceling = 3,

    /// Goal completed successfully.
    Succeeded = 4,

    /// Goal was canceled.
    Canceled = 5,

    /// Goal was aborted by the action server.
    Aborted = 6,
}

impl GoalStatus {
    /// Returns true for `Succeeded`, `Canceled`, and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalStatus::Succeeded | GoalStatus::Canceled | GoalStatus::Aborted
        )
    }
}

impl From<i8> for GoalStatus {
    fn from(s: i8) -> Self {
        match s {
            1 => GoalStatus::Accepted,
            2 => GoalStatus::Executing,
            3 => GoalStatus::Canceling,
            4 => GoalStatus::Succeeded,
            5 => GoalStatus::Canceled,
            6 => GoalStatus::Aborted,
            _ => GoalStatus::Unknown,
        }
    }
}

impl From<GoalStatus> for i8 {
    fn from(status: GoalStatus) -> Self {
        status as i8
    }
}

/// Events that drive goal state transitions on the server side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GoalEvent {
    /// Begin executing the goal.
    Execute,

    /// A cancel request was admitted for the goal.
    CancelGoal,

    /// The goal finished successfully.
    Succeed,

    /// The goal was aborted.
    Abort,

    /// Cancellation completed.
    Canceled,
}

/// Applies `event` to `status`, returning the next status or `None` when
/// the transition is not allowed.
pub fn transition(status: GoalStatus, event: GoalEvent) -> Option<GoalStatus> {
    use GoalEvent::*;
    use GoalStatus::*;

    match (status, event) {
        (Accepted, Execute) => Some(Executing),
        (Accepted, CancelGoal) | (Executing, CancelGoal) => Some(Canceling),
        (Executing, Succeed) | (Canceling, Succeed) => Some(Succeeded),
        (Executing, Abort) | (Canceling, Abort) => Some(Aborted),
        (Canceling, GoalEvent::Canceled) => Some(GoalStatus::Canceled),
        _ => None,
    }
}

/// Outcome code of a cancel request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelCode {
    /// Cancellation was admitted for at least one goal.
    None = 0,

    /// The server rejected the cancellation.
    Rejected = 1,

    /// No goal with the requested id exists.
    UnknownGoal = 2,

    /// The goal already reached a terminal state.
    GoalTerminated = 3,
}

impl From<i8> for CancelCode {
    fn from(c: i8) -> Self {
        match c {
            1 => CancelCode::Rejected,
            2 => CancelCode::UnknownGoal,
            3 => CancelCode::GoalTerminated,
            _ => CancelCode::None,
        }
    }
}

impl From<CancelCode> for i8 {
    fn from(code: CancelCode) -> Self {
        code as i8
    }
}

/// Message set of one action type.
pub trait ActionTypes: 'static {
    /// Goal payload sent by the client.
    type Goal: Clone + Send + 'static;

    /// Feedback payload published by the server while a goal runs.
    type Feedback: Clone + Send + 'static;

    /// Result payload delivered when a goal ends.
    type Result: Clone + Send + 'static;
}

/// Identity and acceptance time of one goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GoalInfo {
    pub goal_id: GoalUuid,
    pub stamp_nanos: i64,
}

/// Request of the goal service.
#[derive(Debug, Clone)]
pub struct SendGoalRequest<G> {
    pub goal_id: GoalUuid,
    pub goal: G,
}

/// Response of the goal service.
#[derive(Debug, Clone, Copy)]
pub struct SendGoalResponse {
    pub accepted: bool,
    pub stamp_nanos: i64,
}

/// Request of the cancel service.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelRequest {
    pub goal_info: GoalInfo,
}

/// Response of the cancel service.
#[derive(Debug, Clone)]
pub struct CancelResponse {
    pub return_code: CancelCode,
    pub goals_canceling: Vec<GoalInfo>,
}

impl CancelResponse {
    /// A response carrying only an error code.
    pub fn rejected(code: CancelCode) -> Self {
        Self {
            return_code: code,
            goals_canceling: Vec::new(),
        }
    }
}

/// Request of the result service.
#[derive(Debug, Clone, Copy)]
pub struct ResultRequest {
    pub goal_id: GoalUuid,
}

/// Response of the result service.
#[derive(Debug, Clone)]
pub struct ResultResponse<R> {
    pub status: GoalStatus,
    pub result: R,
}

/// One feedback sample on the feedback topic.
#[derive(Debug, Clone)]
pub struct FeedbackMessage<F> {
    pub goal_id: GoalUuid,
    pub feedback: F,
}

/// Status of one goal within a status array.
#[derive(Debug, Clone, Copy)]
pub struct GoalStatusEntry {
    pub info: GoalInfo,
    pub status: GoalStatus,
}

/// Snapshot of every live goal on a server, published on the status topic.
#[derive(Debug, Clone, Default)]
pub struct GoalStatusArray {
    pub status_list: Vec<GoalStatusEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_lifecycle() {
        let s = transition(GoalStatus::Accepted, GoalEvent::Execute).unwrap();
        assert_eq!(s, GoalStatus::Executing);
        let s = transition(s, GoalEvent::CancelGoal).unwrap();
        assert_eq!(s, GoalStatus::Canceling);
        let s = transition(s, GoalEvent::Canceled).unwrap();
        assert_eq!(s, GoalStatus::Canceled);
        assert!(s.is_terminal());
    }

    #[test]
    fn test_transition_rejects_invalid() {
        assert!(transition(GoalStatus::Unknown, GoalEvent::Execute).is_none());
        assert!(transition(GoalStatus::Succeeded, GoalEvent::CancelGoal).is_none());
        assert!(transition(GoalStatus::Accepted, GoalEvent::Canceled).is_none());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            GoalStatus::Unknown,
            GoalStatus::Accepted,
            GoalStatus::Executing,
            GoalStatus::Canceling,
            GoalStatus::Succeeded,
            GoalStatus::Canceled,
            GoalStatus::Aborted,
        ] {
            assert_eq!(GoalStatus::from(i8::from(s)), s);
        }
    }
}
