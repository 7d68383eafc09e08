use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use keyquorum_ceremony::{
    CeremonyError, CeremonyEvent, InviteError, InviteParams, InviteToken, ManualClock,
    ThresholdPolicy, create_invite, parse_invite,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

fn params(ttl_ms: u64) -> InviteParams {
    InviteParams::new(
        "db-main",
        4,
        ThresholdPolicy { t: 2, n: 3 },
        Duration::from_millis(ttl_ms),
    )
    .with_ceremony_id("cer-1")
}

fn encode(value: serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
}

// ── Expiry ──────────────────────────────────────────────────────

#[test]
fn token_valid_until_ttl_elapses() {
    let clock = ManualClock::new(1_700_000_000_000);
    let token = create_invite(params(1_000), &clock).unwrap();

    let parsed = parse_invite(&token, &clock).unwrap();
    assert_eq!(
        parsed,
        InviteToken {
            v: 1,
            ceremony_id: "cer-1".into(),
            key_ref: "db-main".into(),
            epoch: 4,
            policy: ThresholdPolicy { t: 2, n: 3 },
            exp: 1_700_000_001_000,
        }
    );

    clock.advance(1_000);
    assert!(parse_invite(&token, &clock).is_ok());

    clock.advance(1);
    assert_eq!(
        parse_invite(&token, &clock),
        Err(InviteError::Expired {
            exp: 1_700_000_001_000,
            now: 1_700_000_001_001,
        })
    );
}

#[test]
fn generated_ceremony_ids_are_unique() {
    let clock = ManualClock::new(0);
    let base = InviteParams::new("db", 0, ThresholdPolicy::single(), Duration::from_secs(60));
    let a = parse_invite(&create_invite(base.clone(), &clock).unwrap(), &clock).unwrap();
    let b = parse_invite(&create_invite(base, &clock).unwrap(), &clock).unwrap();
    assert_ne!(a.ceremony_id, b.ceremony_id);
}

// ── Wire format ─────────────────────────────────────────────────

#[test]
fn envelope_uses_camel_case_fields() {
    let clock = ManualClock::new(10);
    let token = create_invite(params(5), &clock).unwrap();
    let bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        value,
        json!({
            "v": 1,
            "ceremonyId": "cer-1",
            "keyRef": "db-main",
            "epoch": 4,
            "policy": {"t": 2, "n": 3},
            "exp": 15
        })
    );
}

#[test]
fn padded_tokens_are_accepted() {
    let clock = ManualClock::new(0);
    let token = encode(json!({"ceremonyId": "c", "keyRef": "k", "exp": 100}));
    let padded = format!("{token}==");
    assert!(parse_invite(&padded, &clock).is_ok());
}

#[test]
fn missing_policy_defaults_to_single_device() {
    let clock = ManualClock::new(0);
    let token = encode(json!({"v": 1, "ceremonyId": "c", "keyRef": "k", "exp": 100}));
    let parsed = parse_invite(&token, &clock).unwrap();
    assert_eq!(parsed.policy, ThresholdPolicy::single());
    assert_eq!(parsed.epoch, 0);
}

// ── Rejections ──────────────────────────────────────────────────

#[test]
fn rejects_bad_encoding_and_json() {
    let clock = ManualClock::new(0);
    assert_eq!(parse_invite("not base64!!", &clock), Err(InviteError::Encoding));

    let not_json = URL_SAFE_NO_PAD.encode(b"hello");
    assert!(matches!(
        parse_invite(&not_json, &clock),
        Err(InviteError::Malformed(_))
    ));
}

#[test]
fn rejects_missing_required_fields() {
    let clock = ManualClock::new(0);
    let cases = [
        (json!({"keyRef": "k", "exp": 1}), "ceremonyId"),
        (json!({"ceremonyId": "c", "exp": 1}), "keyRef"),
        (json!({"ceremonyId": "c", "keyRef": "k"}), "exp"),
    ];
    for (value, field) in cases {
        assert_eq!(
            parse_invite(&encode(value), &clock),
            Err(InviteError::MissingField(field))
        );
    }
}

#[test]
fn rejects_unknown_version_and_bad_policy() {
    let clock = ManualClock::new(0);
    let future = encode(json!({"v": 2, "ceremonyId": "c", "keyRef": "k", "exp": 100}));
    assert_eq!(
        parse_invite(&future, &clock),
        Err(InviteError::UnsupportedVersion(2))
    );

    let bad_policy = encode(json!({
        "v": 1, "ceremonyId": "c", "keyRef": "k", "exp": 100,
        "policy": {"t": 3, "n": 2}
    }));
    assert_eq!(
        parse_invite(&bad_policy, &clock),
        Err(InviteError::InvalidPolicy { t: 3, n: 2 })
    );
}

#[test]
fn tampered_token_does_not_parse() {
    let clock = ManualClock::new(0);
    let token = create_invite(params(60_000), &clock).unwrap();
    let truncated = &token[..token.len() / 2];
    assert!(parse_invite(truncated, &clock).is_err());
}

#[test]
fn create_rejects_invalid_policy_as_invite_error() {
    let clock = ManualClock::new(0);
    let bad = InviteParams::new(
        "db-main",
        1,
        ThresholdPolicy { t: 4, n: 3 },
        Duration::from_secs(60),
    );
    let result = create_invite(bad, &clock);
    assert!(matches!(
        result,
        Err(CeremonyError::Invite(InviteError::InvalidPolicy { t: 4, n: 3 }))
    ));
}

#[test]
fn encoded_token_is_plain_json_inside() {
    let clock = ManualClock::new(0);
    let token = InviteToken::issue(params(1_000), &clock).unwrap();
    let bytes = URL_SAFE_NO_PAD.decode(token.encode().unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["ceremonyId"], "cer-1");
    assert_eq!(value["policy"]["t"], 2);
    assert_eq!(value["exp"], 1_000);
}

// ── Seeding ─────────────────────────────────────────────────────

#[test]
fn seed_events_match_token() {
    let clock = ManualClock::new(0);
    let token = parse_invite(&create_invite(params(1_000), &clock).unwrap(), &clock).unwrap();
    let [init, join] = token.seed_events("phone-1", "phone");
    assert_eq!(
        init,
        CeremonyEvent::Init {
            ceremony_id: "cer-1".into(),
            key_ref: "db-main".into(),
            epoch: 4,
            policy: ThresholdPolicy { t: 2, n: 3 },
        }
    );
    assert_eq!(
        join,
        CeremonyEvent::Join {
            ceremony_id: Some("cer-1".into()),
            device_id: "phone-1".into(),
            role: Some("phone".into()),
        }
    );
}
