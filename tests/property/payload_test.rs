// tests/property/payload_test.rs

use bytes::Bytes;
use proptest::prelude::*;
use specular::core::transport::payload::{
    MAX_FILE_BYTES, OutboundFile, OutboundPayload, SPLIT_GROUP_MAX_BYTES, SPLIT_GROUP_MAX_FILES,
    SubmissionPlan, plan_submission,
};

fn file_sizes() -> impl Strategy<Value = Vec<u64>> {
    // Anything that survived the attachment stage is under the upload cap.
    proptest::collection::vec(1u64..MAX_FILE_BYTES, 0..10)
}

fn payload_with(sizes: &[u64], content_len: usize) -> OutboundPayload {
    OutboundPayload {
        content: "x".repeat(content_len),
        files: sizes
            .iter()
            .enumerate()
            .map(|(n, size)| OutboundFile {
                filename: format!("{n}.bin"),
                // Size matters, content does not; keep allocations small by
                // observing only the length.
                bytes: Bytes::from(vec![0u8; *size as usize]),
            })
            .collect(),
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Splitting preserves every file and respects the group bounds.
    #[test]
    fn prop_split_preserves_files_and_bounds(sizes in file_sizes(), content_len in 0usize..500) {
        let payload = payload_with(&sizes, content_len);
        match plan_submission(payload) {
            SubmissionPlan::Single(p) => {
                prop_assert_eq!(p.files.len(), sizes.len());
            }
            SubmissionPlan::Split { first, file_groups } => {
                prop_assert!(first.files.is_empty());
                let regrouped: usize = file_groups.iter().map(|g| g.len()).sum();
                prop_assert_eq!(regrouped, sizes.len());
                for group in &file_groups {
                    prop_assert!(group.len() <= SPLIT_GROUP_MAX_FILES);
                    let bytes: u64 = group.iter().map(|f| f.size()).sum();
                    prop_assert!(bytes <= SPLIT_GROUP_MAX_BYTES || group.len() == 1);
                }
            }
        }
    }

    /// File order is stable across a split.
    #[test]
    fn prop_split_keeps_order(sizes in file_sizes()) {
        let payload = payload_with(&sizes, 10);
        if let SubmissionPlan::Split { file_groups, .. } = plan_submission(payload) {
            let names: Vec<String> = file_groups
                .iter()
                .flatten()
                .map(|f| f.filename.clone())
                .collect();
            let expected: Vec<String> = (0..sizes.len()).map(|n| format!("{n}.bin")).collect();
            prop_assert_eq!(names, expected);
        }
    }
}
