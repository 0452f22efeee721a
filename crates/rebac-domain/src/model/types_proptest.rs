//! Property tests for the string forms.

use proptest::prelude::*;

use super::tuple::{split_object, split_object_relation, validate_user};
use super::types::Object;

proptest! {
    #[test]
    fn object_parse_never_panics(input in ".*") {
        let _ = Object::parse(&input);
    }

    #[test]
    fn object_display_round_trips(
        object_type in "[a-z][a-z0-9_]{0,16}",
        object_id in "[a-zA-Z0-9_-]{1,24}",
    ) {
        let object = Object::new(&object_type, &object_id);
        let parsed = Object::parse(&object.to_string()).unwrap();
        prop_assert_eq!(parsed, object);
    }

    #[test]
    fn split_helpers_never_panic(input in ".*") {
        let _ = split_object(&input);
        let _ = split_object_relation(&input);
        let _ = validate_user(&input);
    }

    #[test]
    fn wildcard_users_always_rejected(user_type in "[a-z][a-z0-9_]{0,16}") {
        let wildcard_user = format!("{}:*", user_type);
        prop_assert!(validate_user(&wildcard_user).is_err());
    }
}
