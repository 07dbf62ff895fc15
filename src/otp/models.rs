use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What a one-time code proves when verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Signin,
    Register,
}

impl OtpPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signin => "signin",
            Self::Register => "register",
        }
    }
}

/// The columns verification needs from the locked candidate row.
#[derive(Debug)]
pub(super) struct CandidateCode {
    pub(super) id: Uuid,
    pub(super) code: String,
    pub(super) attempts: i32,
    pub(super) expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::OtpPurpose;

    #[test]
    fn purpose_as_str_matches_schema_values() {
        assert_eq!(OtpPurpose::Signin.as_str(), "signin");
        assert_eq!(OtpPurpose::Register.as_str(), "register");
    }
}
