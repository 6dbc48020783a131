use ace_sdk::errors::{AceError, AceErrorExt, ModelError};
use ace_sdk::types::Feedback;
use proptest::prelude::*;

// User hints never echo the raw error payload, which may carry model output or paths.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-zA-Z0-9/_.]{12,40}") {
        let errs = vec![
            AceError::Generation(error_str.clone()),
            AceError::Execution(error_str.clone()),
            AceError::Reflection(error_str.clone()),
            AceError::Curation(error_str.clone()),
            AceError::Persistence(error_str.clone()),
            AceError::Config(error_str.clone()),
            AceError::Database(error_str.clone()),
            AceError::UnknownRun(error_str.clone()),
            AceError::Model(ModelError::MalformedOutput(error_str.clone())),
            AceError::Model(ModelError::Provider(error_str.clone())),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
            prop_assert!(!err.kind().is_empty());
        }
    }
}

proptest! {
    #[test]
    fn test_feedback_display_round_trip(correct in any::<bool>()) {
        let feedback = if correct { Feedback::Correct } else { Feedback::Incorrect };
        let parsed: Feedback = feedback.to_string().parse().unwrap();
        prop_assert_eq!(parsed, feedback);
    }
}
