use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Ended,
    Reopened,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session already ended")]
    AlreadyEnded,
    #[error("only ended sessions can be reopened")]
    NotEnded,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(Self::Active),
            "Ended" => Some(Self::Ended),
            "Reopened" => Some(Self::Reopened),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Ended => "Ended",
            Self::Reopened => "Reopened",
        }
    }

    pub fn end(self) -> Result<Self, TransitionError> {
        match self {
            Self::Ended => Err(TransitionError::AlreadyEnded),
            Self::Active | Self::Reopened => Ok(Self::Ended),
        }
    }

    pub fn reopen(self) -> Result<Self, TransitionError> {
        match self {
            Self::Ended => Ok(Self::Reopened),
            Self::Active | Self::Reopened => Err(TransitionError::NotEnded),
        }
    }

    /// Status given to a student recognised while this session is open.
    pub fn arrival_status(self) -> RecordStatus {
        match self {
            Self::Reopened => RecordStatus::Late,
            Self::Active | Self::Ended => RecordStatus::Present,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Present,
    Absent,
    Late,
    Leave,
}

impl RecordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            "Late" => Some(Self::Late),
            "Leave" => Some(Self::Leave),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
            Self::Leave => "Leave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMethod {
    FaceId,
    Manual,
    Auto,
    Leave,
}

impl RecordMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FaceId => "FaceID",
            Self::Manual => "Manual",
            Self::Auto => "Auto",
            Self::Leave => "Leave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

/// Whole minutes left in a session window, never negative.
pub fn remaining_minutes(duration_minutes: i64, elapsed_secs: i64) -> i64 {
    let remaining_secs = duration_minutes * 60 - elapsed_secs;
    (remaining_secs / 60).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_active_ended_reopened() {
        let s = SessionStatus::Active;
        let ended = s.end().expect("end active");
        assert_eq!(ended, SessionStatus::Ended);
        assert_eq!(ended.end(), Err(TransitionError::AlreadyEnded));
        let reopened = ended.reopen().expect("reopen ended");
        assert_eq!(reopened, SessionStatus::Reopened);
        assert_eq!(reopened.reopen(), Err(TransitionError::NotEnded));
        assert_eq!(reopened.end(), Ok(SessionStatus::Ended));
        assert_eq!(SessionStatus::Active.reopen(), Err(TransitionError::NotEnded));
    }

    #[test]
    fn reopened_sessions_mark_late() {
        assert_eq!(SessionStatus::Active.arrival_status(), RecordStatus::Present);
        assert_eq!(SessionStatus::Reopened.arrival_status(), RecordStatus::Late);
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [SessionStatus::Active, SessionStatus::Ended, SessionStatus::Reopened] {
            assert_eq!(SessionStatus::parse(s.as_str()), Some(s));
        }
        for s in [
            RecordStatus::Present,
            RecordStatus::Absent,
            RecordStatus::Late,
            RecordStatus::Leave,
        ] {
            assert_eq!(RecordStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RecordStatus::parse("present"), None);
        assert_eq!(RecordMethod::FaceId.as_str(), "FaceID");
        assert_eq!(LeaveStatus::parse("Pending"), Some(LeaveStatus::Pending));
    }

    #[test]
    fn remaining_minutes_floors_and_clamps() {
        assert_eq!(remaining_minutes(10, 0), 10);
        assert_eq!(remaining_minutes(10, 59), 9);
        assert_eq!(remaining_minutes(10, 600), 0);
        assert_eq!(remaining_minutes(10, 3600), 0);
    }
}
