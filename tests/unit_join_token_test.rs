mod support;

use chrono::{Duration, Utc};

use omnid::core::resource::kinds::JoinTokenState;
use omnid::core::resource::{Kind, ResourceKey};
use support::{TestPlane, join_machine};

fn token_secret(plane: &TestPlane, token_id: &str) -> String {
    plane
        .store
        .get(&ResourceKey::in_default(Kind::JoinToken, token_id))
        .unwrap()
        .spec
        .as_join_token()
        .unwrap()
        .token
        .clone()
}

#[tokio::test]
async fn test_first_token_becomes_default_and_active() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("initial", None).unwrap();

    plane.settle().await;

    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::JoinTokenStatus, token.id()))
        .unwrap();
    let status = status.spec.as_join_token_status().unwrap();
    assert_eq!(status.state, JoinTokenState::Active);
    assert!(status.is_default);
    assert_eq!(status.use_count, 0);
    assert_eq!(status.name, "initial");
}

#[tokio::test]
async fn test_use_count_tracks_link_registrations() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("fleet", None).unwrap();
    let secret = token_secret(&plane, token.id());

    join_machine(&plane, "m1", &secret);
    join_machine(&plane, "m2", &secret);
    plane.settle().await;

    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::JoinTokenStatus, token.id()))
        .unwrap();
    assert_eq!(status.spec.as_join_token_status().unwrap().use_count, 2);
}

#[tokio::test]
async fn test_revoked_token_state_and_rejection() {
    let plane = TestPlane::new().with_siderolink_config();
    let token = plane.service.create_join_token("doomed", None).unwrap();
    let secret = token_secret(&plane, token.id());

    plane.service.revoke_join_token(token.id()).unwrap();
    plane.settle().await;

    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::JoinTokenStatus, token.id()))
        .unwrap();
    assert_eq!(
        status.spec.as_join_token_status().unwrap().state,
        JoinTokenState::Revoked
    );

    let err = plane
        .service
        .register_link("m9", "pk", "fdae::9/64", "203.0.113.9:51820", None, &secret)
        .unwrap_err();
    assert!(matches!(err, omnid::core::Error::PermissionDenied(_)));
}

#[tokio::test]
async fn test_expired_token_state() {
    let plane = TestPlane::new().with_siderolink_config();
    let expired_at = Utc::now() - Duration::hours(1);
    let token = plane
        .service
        .create_join_token("stale", Some(expired_at))
        .unwrap();

    plane.settle().await;

    let status = plane
        .store
        .get(&ResourceKey::in_default(Kind::JoinTokenStatus, token.id()))
        .unwrap();
    assert_eq!(
        status.spec.as_join_token_status().unwrap().state,
        JoinTokenState::Expired
    );
}

#[tokio::test]
async fn test_second_token_is_not_default_until_promoted() {
    let plane = TestPlane::new().with_siderolink_config();
    let first = plane.service.create_join_token("first", None).unwrap();
    let second = plane.service.create_join_token("second", None).unwrap();

    plane.settle().await;

    let status_of = |id: &str| {
        plane
            .store
            .get(&ResourceKey::in_default(Kind::JoinTokenStatus, id))
            .unwrap()
            .spec
            .as_join_token_status()
            .unwrap()
            .clone()
    };
    assert!(status_of(first.id()).is_default);
    assert!(!status_of(second.id()).is_default);

    plane.service.set_default_join_token(second.id()).unwrap();
    plane.settle().await;
    assert!(!status_of(first.id()).is_default);
    assert!(status_of(second.id()).is_default);
}
