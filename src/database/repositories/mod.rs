pub mod stamp;
pub mod tag;

pub use stamp::StampRepository;
pub use tag::TagRepository;

use super::{Database, DatabaseError};
use rusqlite::Connection;

pub const MAX_TAG_LENGTH: usize = 50;

pub trait Repository<'a> {
    fn database(&self) -> &'a Database;

    fn connection(&self) -> &'a Connection {
        self.database().connection()
    }
}

pub(crate) fn validate_id(id: i64) -> Result<(), DatabaseError> {
    if id <= 0 {
        return Err(DatabaseError::Validation(format!(
            "id must be a positive integer, got {}",
            id
        )));
    }
    Ok(())
}

/// Trimmed tag name, or a validation error for blank or overlong names.
pub(crate) fn validate_tag_name(name: &str) -> Result<&str, DatabaseError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::Validation(
            "tag name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TAG_LENGTH {
        return Err(DatabaseError::Validation(format!(
            "tag name must be at most {} characters",
            MAX_TAG_LENGTH
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id(1).is_ok());
        assert!(matches!(validate_id(0), Err(DatabaseError::Validation(_))));
        assert!(matches!(validate_id(-7), Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn test_validate_tag_name() {
        assert_eq!(validate_tag_name("  vintage ").unwrap(), "vintage");
        assert!(matches!(validate_tag_name("   "), Err(DatabaseError::Validation(_))));
        assert!(matches!(validate_tag_name(""), Err(DatabaseError::Validation(_))));

        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        assert!(matches!(validate_tag_name(&long), Err(DatabaseError::Validation(_))));
        assert!(validate_tag_name(&"é".repeat(MAX_TAG_LENGTH)).is_ok());
    }
}
