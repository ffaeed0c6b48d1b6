use orderflow_auth::{AuthError, CallerIdentity, IdentityValidator, TrustedHeaderValidator};
use proptest::prelude::*;
use uuid::Uuid;

#[tokio::test]
async fn round_trips_a_well_formed_identity() {
    let validator = TrustedHeaderValidator;
    let user_id = Uuid::new_v4();
    let identity = validator.validate(&user_id.to_string()).await.unwrap();
    assert_eq!(identity, CallerIdentity { user_id });
}

#[tokio::test]
async fn whitespace_only_header_is_treated_as_missing() {
    let validator = TrustedHeaderValidator;
    let err = validator.validate("   ").await.unwrap_err();
    assert_eq!(err, AuthError::MissingIdentity);
}

proptest! {
    #[test]
    fn any_valid_uuid_string_round_trips(id in proptest::array::uniform16(0u8..)) {
        let uuid = Uuid::from_bytes(id);
        let validator = TrustedHeaderValidator;
        let rendered = uuid.to_string();
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(validator.validate(&rendered));
        prop_assert_eq!(result, Ok(CallerIdentity { user_id: uuid }));
    }

    #[test]
    fn garbage_strings_never_parse(s in "[^0-9a-fA-F-]{1,32}") {
        let validator = TrustedHeaderValidator;
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(validator.validate(&s));
        prop_assert!(matches!(result, Err(AuthError::Malformed(_))));
    }
}
