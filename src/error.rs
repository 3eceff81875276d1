use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("login failed, portal landed on {location}")]
    Authentication { location: String },

    #[error("unsupported term \"{term}\" (offered: {})", .offered.join(", "))]
    UnsupportedTerm { term: String, offered: Vec<String> },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("unexpected page structure: {0}")]
    Parse(String),

    #[error("email delivery failed: {0}")]
    Delivery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GradeError {
    // Fatal errors end the process; the rest only end the current cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GradeError::Authentication { .. } | GradeError::UnsupportedTerm { .. } | GradeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(GradeError::Authentication { location: "x".into() }.is_fatal());
        assert!(GradeError::UnsupportedTerm { term: "Fall 2023".into(), offered: vec![] }.is_fatal());
        assert!(GradeError::Config("SOURCE_EMAIL".into()).is_fatal());
        assert!(!GradeError::Parse("no table".into()).is_fatal());
        assert!(!GradeError::Delivery("refused".into()).is_fatal());
        assert!(!GradeError::Navigation("timeout".into()).is_fatal());
    }

    #[test]
    fn unsupported_term_lists_offered() {
        let err = GradeError::UnsupportedTerm {
            term: "Summer 1999".into(),
            offered: vec!["Fall 2023".into(), "Winter 2024".into()],
        };
        assert_eq!(
            err.to_string(),
            "unsupported term \"Summer 1999\" (offered: Fall 2023, Winter 2024)"
        );
    }
}
