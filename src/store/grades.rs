//! Quality grades for archived feeds.
//!
//! A rebuilt feed carries a `grade` metadata value tracking how much we
//! trust the rebuild: the machine assigns one while building, and users
//! can overwrite it with their own judgment afterwards. User feedback
//! may only replace a user grade or the machine's own "suspect" rating;
//! it never overrules an admin or trusted-automatic grade.

pub const GRADE_FAILED: &str = "failed";
pub const GRADE_BUILDING: &str = "building";
pub const GRADE_ADMIN_BAD: &str = "admin-bad";
pub const GRADE_USER_VBAD: &str = "user-vbad";
pub const GRADE_USER_BAD: &str = "user-bad";
pub const GRADE_USER_GOOD: &str = "user-good";
pub const GRADE_USER_PERFECT: &str = "user-perfect";
pub const GRADE_AUTO_SUSPECT: &str = "auto-suspect";
pub const GRADE_AUTO_TRUSTED: &str = "auto-trusted";
pub const GRADE_ADMIN_GOOD: &str = "admin-good";

/// Grades a user may set.
pub const USER_GRADES: &[&str] = &[
    GRADE_USER_VBAD,
    GRADE_USER_BAD,
    GRADE_USER_GOOD,
    GRADE_USER_PERFECT,
];

pub fn is_user_grade(grade: &str) -> bool {
    USER_GRADES.contains(&grade)
}

/// May a user grade replace the current one?
pub fn user_may_overwrite(current: &str) -> bool {
    is_user_grade(current) || current == GRADE_AUTO_SUSPECT
}

/// Should a preview carry a quality warning for this grade?
pub fn warrants_caution(grade: &str) -> bool {
    matches!(
        grade,
        GRADE_AUTO_SUSPECT | GRADE_USER_VBAD | GRADE_USER_BAD | GRADE_USER_GOOD | GRADE_ADMIN_BAD
    ) || grade.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_grades() {
        assert!(is_user_grade(GRADE_USER_PERFECT));
        assert!(is_user_grade(GRADE_USER_VBAD));
        assert!(!is_user_grade(GRADE_AUTO_TRUSTED));
        assert!(!is_user_grade("something-else"));
    }

    #[test]
    fn test_overwrite_rule() {
        assert!(user_may_overwrite(GRADE_USER_GOOD));
        assert!(user_may_overwrite(GRADE_AUTO_SUSPECT));
        assert!(!user_may_overwrite(GRADE_AUTO_TRUSTED));
        assert!(!user_may_overwrite(GRADE_ADMIN_GOOD));
        assert!(!user_may_overwrite(GRADE_BUILDING));
    }

    #[test]
    fn test_caution() {
        assert!(warrants_caution(GRADE_AUTO_SUSPECT));
        assert!(warrants_caution(GRADE_USER_BAD));
        assert!(warrants_caution(""));
        assert!(!warrants_caution(GRADE_AUTO_TRUSTED));
        assert!(!warrants_caution(GRADE_USER_PERFECT));
    }
}
