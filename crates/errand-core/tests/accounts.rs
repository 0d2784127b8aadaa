//! Account endpoints and the profile, over the wire.

mod common;

use common::{client, FakeApi, ACTIVATION_TOKEN, EMAIL};
use errand_core::api::Registration;
use errand_core::ApiError;
use serde_json::json;

fn registration<'a>(email: &'a str, password_confirm: &'a str) -> Registration<'a> {
    Registration {
        full_name: "Ada Lovelace",
        email,
        password: "analytical-engine",
        password_confirm,
    }
}

#[tokio::test]
async fn test_register_decodes_created_account() {
    let fake = FakeApi::new("nobody", "nobody");
    let base = fake.spawn().await;
    let accounts = client(&base, None).accounts();

    let registered = accounts
        .register(&registration("ada@example.com", "analytical-engine"))
        .await
        .expect("register");

    assert_eq!(registered.user_id, 42);
    assert_eq!(registered.message, "User registered successfully");
    assert_eq!(
        fake.0.account_posts.lock()[0],
        json!({
            "full_name": "Ada Lovelace",
            "email": "ada@example.com",
            "password": "analytical-engine",
            "password_confirm": "analytical-engine"
        })
    );
}

#[tokio::test]
async fn test_register_maps_field_errors() {
    let fake = FakeApi::new("nobody", "nobody");
    let base = fake.spawn().await;
    let accounts = client(&base, None).accounts();

    match accounts.register(&registration(EMAIL, "analytical-engine")).await {
        Err(ApiError::Validation(errors)) => {
            assert_eq!(errors.field("email"), ["A user with that email already exists."]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    // Mismatch never reaches the server
    assert!(accounts
        .register(&registration("ada@example.com", "difference-engine"))
        .await
        .is_err());
    assert_eq!(fake.0.account_posts.lock().len(), 1);
}

#[tokio::test]
async fn test_activation_and_resend() {
    let fake = FakeApi::new("nobody", "nobody");
    let base = fake.spawn().await;
    let accounts = client(&base, None).accounts();

    let ack = accounts.activate("NDI", ACTIVATION_TOKEN).await.expect("activate");
    assert_eq!(ack.message.as_deref(), Some("Account activated successfully"));

    match accounts.activate("NDI", "expired").await {
        Err(ApiError::Validation(errors)) => {
            assert_eq!(errors.general_messages(), ["Invalid or expired activation link"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let ack = accounts.resend_activation(EMAIL).await.expect("resend");
    assert_eq!(ack.message.as_deref(), Some("Activation email sent"));
    assert_eq!(fake.0.account_posts.lock()[2], json!({"email": EMAIL}));
}

#[tokio::test]
async fn test_password_reset_accepts_empty_acknowledgements() {
    let fake = FakeApi::new("nobody", "nobody");
    let base = fake.spawn().await;
    let accounts = client(&base, None).accounts();

    let ack = accounts.request_password_reset(EMAIL).await.expect("request");
    assert!(ack.message.is_none());

    let ack = accounts
        .confirm_password_reset("NDI", ACTIVATION_TOKEN, "n3w-secret", "n3w-secret")
        .await
        .expect("204 is an acknowledgement");
    assert!(ack.message.is_none());

    match accounts
        .confirm_password_reset("NDI", "stale", "n3w-secret", "n3w-secret")
        .await
    {
        Err(ApiError::Validation(errors)) => {
            assert_eq!(errors.general_messages(), ["Invalid or expired reset link"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let posts = fake.0.account_posts.lock();
    assert_eq!(posts.len(), 3);
    assert_eq!(
        posts[1],
        json!({
            "uidb64": "NDI",
            "token": ACTIVATION_TOKEN,
            "password": "n3w-secret",
            "password_confirm": "n3w-secret"
        })
    );
}

#[tokio::test]
async fn test_profile_is_fetched_with_credentials() {
    let fake = FakeApi::new("A1", "R1");
    let base = fake.spawn().await;
    let api = client(&base, Some(("A1", "R1")));

    let profile = api.profile().await.expect("profile");
    assert_eq!(profile.full_name, "Una Example");
    assert_eq!(profile.email, EMAIL);
    assert_eq!(fake.seen(), ["Bearer A1"]);

    let anonymous = client(&base, None);
    assert!(matches!(
        anonymous.profile().await,
        Err(ApiError::Unauthenticated)
    ));
}
