//! Backup naming schemes.
//!
//! Backups are folders under `backups/` whose names encode the backup date
//! positionally. Two schemes exist and are told apart by length:
//!
//! - 14 characters, `MMDDYYYYhhmmss` (e.g. `03242022132649`)
//! - 35 characters, `YYYYMMDDhhmmss-<20 digit suffix>` (e.g. `20220502230023-47180780406793064490`)

use chrono::NaiveDate;
use std::ops::Range;

use crate::storage::backend::StorageError;
use crate::storage::locator::Locator;

const SHORT_NAME_LEN: usize = 14;
const LONG_NAME_LEN: usize = 35;

pub fn calculate_date(name: &str) -> Result<NaiveDate, StorageError> {
    let (year, month, day) = match name.len() {
        SHORT_NAME_LEN => (
            numeric_field(name, 4..8)?,
            numeric_field(name, 0..2)?,
            numeric_field(name, 2..4)?,
        ),
        LONG_NAME_LEN => (
            numeric_field(name, 0..4)?,
            numeric_field(name, 4..6)?,
            numeric_field(name, 6..8)?,
        ),
        other => {
            return Err(StorageError::DateParse {
                name: name.to_string(),
                reason: format!("unexpected length {}", other),
            })
        }
    };

    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| StorageError::DateParse {
        name: name.to_string(),
        reason: format!("{:04}-{:02}-{:02} is not a calendar date", year, month, day),
    })
}

fn numeric_field(name: &str, range: Range<usize>) -> Result<u32, StorageError> {
    let field = name
        .get(range.clone())
        .filter(|field| field.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| StorageError::DateParse {
            name: name.to_string(),
            reason: format!("characters {}..{} are not digits", range.start, range.end),
        })?;

    field.parse().map_err(|_| StorageError::DateParse {
        name: name.to_string(),
        reason: format!("characters {}..{} are not a number", range.start, range.end),
    })
}

/// Backup name for a raw bucket key, or `None` when the key is not under `backups/`.
/// Shared-bucket keys carry the installation id as an extra leading segment.
pub fn backup_name<'a>(key: &'a str, locator: &Locator) -> Option<&'a str> {
    let mut segments = key.split('/');
    if locator.is_shared() {
        segments.next()?;
    }

    if segments.next()? != "backups" {
        return None;
    }

    segments.next().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_scheme() {
        let date = calculate_date("20220502230023-47180780406793064490").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 5, 2).unwrap());
    }

    #[test]
    fn test_short_scheme() {
        let date = calculate_date("03242022132649").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2022, 3, 24).unwrap());
    }

    #[test]
    fn test_other_lengths_fail() {
        for name in ["", "2022", "032420221326490", "20220502230023-4718078040679306449"] {
            assert!(
                matches!(calculate_date(name), Err(StorageError::DateParse { .. })),
                "expected failure for {:?}",
                name
            );
        }
    }

    #[test]
    fn test_impossible_dates_fail() {
        // month 13
        assert!(matches!(calculate_date("13242022132649"), Err(StorageError::DateParse { .. })));
        // February 30th
        assert!(matches!(
            calculate_date("20220230230023-47180780406793064490"),
            Err(StorageError::DateParse { .. })
        ));
    }

    #[test]
    fn test_non_digit_fields_fail() {
        assert!(matches!(calculate_date("ab242022132649"), Err(StorageError::DateParse { .. })));
    }

    #[test]
    fn test_backup_name_dedicated() {
        let locator = Locator::Dedicated { bucket: "inst".to_string() };
        assert_eq!(backup_name("backups/03242022132649/db.sql", &locator), Some("03242022132649"));
        assert_eq!(backup_name("public/backups/x", &locator), None);
        assert_eq!(backup_name("backups/", &locator), None);
    }

    #[test]
    fn test_backup_name_shared_skips_installation() {
        let locator = Locator::Shared {
            bucket: "shared".to_string(),
            installation: "inst".to_string(),
        };
        assert_eq!(backup_name("inst/backups/03242022132649/db.sql", &locator), Some("03242022132649"));
        assert_eq!(backup_name("backups/03242022132649/db.sql", &locator), None);
    }
}
