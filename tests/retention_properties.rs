use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use tokio::runtime::Runtime;

use backup_warden::model::{Backup, Credentials, Filesource};
use backup_warden::purge::plan_retention;
use backup_warden::storage::backends::MemoryConnector;
use backup_warden::storage::naming::calculate_date;
use backup_warden::storage::{Connector, StorageError};

fn backups_from(days: &[Option<u16>]) -> Vec<Backup> {
    let epoch = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    days.iter()
        .enumerate()
        .map(|(i, day)| Backup {
            name: format!("backup-{:03}", i),
            filesource_id: "primary".to_string(),
            filesource: Filesource::amazon(Credentials::default()),
            date: day.map(|d| epoch + Duration::days(d as i64)),
        })
        .collect()
}

proptest! {
    #[test]
    fn test_retention_keeps_newest_dated(
        days in prop::collection::vec(prop::option::weighted(0.8, 0u16..2000), 0..60),
        quantity in 1usize..20,
    ) {
        let dated = days.iter().filter(|d| d.is_some()).count();
        let undated = days.len() - dated;
        let plan = plan_retention(backups_from(&days), quantity);

        prop_assert_eq!(plan.keep.len(), quantity.min(dated));
        prop_assert_eq!(plan.keep.len() + plan.delete.len(), dated);
        prop_assert_eq!(plan.undated.len(), undated);
        prop_assert!(plan.delete.iter().chain(plan.keep.iter()).all(|b| b.date.is_some()));

        let newest_deleted = plan.delete.iter().filter_map(|b| b.date).max();
        let oldest_kept = plan.keep.iter().filter_map(|b| b.date).min();
        if let (Some(deleted), Some(kept)) = (newest_deleted, oldest_kept) {
            prop_assert!(deleted <= kept);
        }
    }

    #[test]
    fn test_both_name_schemes_parse(year in 1970i32..2100, month in 1u32..=12, day in 1u32..=28, suffix in "[0-9]{20}") {
        let expected = NaiveDate::from_ymd_opt(year, month, day).unwrap();

        let short = format!("{:02}{:02}{:04}235959", month, day, year);
        prop_assert_eq!(calculate_date(&short).unwrap(), expected);

        let long = format!("{:04}{:02}{:02}000000-{}", year, month, day, suffix);
        prop_assert_eq!(calculate_date(&long).unwrap(), expected);
    }

    #[test]
    fn test_other_lengths_never_parse(name in "[0-9]{0,40}") {
        prop_assume!(name.len() != 14 && name.len() != 35);
        let is_date_error = matches!(calculate_date(&name), Err(StorageError::DateParse { .. }));
        prop_assert!(is_date_error);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_listing_independent_of_page_size(keys in 0usize..40, versions in 1usize..4, page_size in 1usize..25) {
        let rt = Runtime::new().unwrap();
        let listed = rt.block_on(async {
            let store = MemoryConnector::google().with_page_size(page_size);
            store.create_bucket("inst").await;
            for k in 0..keys {
                for _ in 0..versions {
                    store.put("inst", &format!("private/{:03}", k), 1).await.unwrap();
                }
            }
            store.list_file_versions("inst", "private/", &Credentials::default()).await.unwrap()
        });

        prop_assert_eq!(listed.versions.len(), keys * versions);
        let latest = listed.versions.iter().filter(|v| v.is_latest).count();
        prop_assert_eq!(latest, keys);
    }
}
