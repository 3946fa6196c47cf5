//! Issuance and redemption integration tests.
//!
//! Runs the issue → redeem flow against the in-memory ledger and the flat-file
//! ledger, including concurrent check-in races.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use p256::ecdsa::SigningKey;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use ticketing_core::mocks::{InMemoryLedger, MockNotifier, MockRenderer};
use ticketing_core::{
    deliver, CanonicalSignature, DeliveryReport, FlatFileLedger, KeyManager, RedeemOutcome,
    TicketError, TicketIssuer, TicketLedger, TicketNo, TicketNoFormat, TicketVerifier,
};

fn keys() -> Arc<KeyManager> {
    let signing_key = SigningKey::from_slice(&[7u8; 32]).expect("valid scalar");
    Arc::new(KeyManager::from_signing_key(signing_key))
}

fn format() -> TicketNoFormat {
    TicketNoFormat::new("CYP", 3).expect("valid format")
}

fn in_memory() -> (
    Arc<InMemoryLedger>,
    TicketIssuer<InMemoryLedger>,
    TicketVerifier<InMemoryLedger>,
) {
    let ledger = Arc::new(InMemoryLedger::new(format()));
    let keys = keys();
    let issuer = TicketIssuer::new(Arc::clone(&ledger), Arc::clone(&keys));
    let verifier = TicketVerifier::new(Arc::clone(&ledger), keys.public_key().clone());
    (ledger, issuer, verifier)
}

#[tokio::test]
async fn test_issue_and_redeem_scenario() {
    let (_ledger, issuer, verifier) = in_memory();

    let alice = issuer.issue("Alice", "alice@example.com").await.expect("issue alice");
    let bob = issuer.issue("Bob", "bob@example.com").await.expect("issue bob");
    assert_eq!(alice.ticket_no.as_str(), "CYP001");
    assert_eq!(bob.ticket_no.as_str(), "CYP002");

    let alice_sig = alice.signature_text().expect("signed");
    let bob_sig = bob.signature_text().expect("signed");

    let first = verifier.redeem(&alice.ticket_no, &alice_sig).await.expect("redeem");
    assert!(matches!(first, RedeemOutcome::Accepted(ref t) if t.checked && t.name == "Alice"));

    let replay = verifier.redeem(&alice.ticket_no, &alice_sig).await.expect("redeem");
    assert!(matches!(replay, RedeemOutcome::AlreadyChecked(_)));

    let swapped = verifier.redeem(&alice.ticket_no, &bob_sig).await.expect("redeem");
    assert_eq!(swapped, RedeemOutcome::InvalidSignature);
}

#[tokio::test]
async fn test_tampered_signature_never_flips_checked() {
    let (ledger, issuer, verifier) = in_memory();
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    let signature = ticket.signature.expect("signed");

    let mut bytes = *signature.as_bytes();
    bytes[40] ^= 0x01;
    let tampered = CanonicalSignature::from_array(bytes).to_text();

    let outcome = verifier.redeem(&ticket.ticket_no, &tampered).await.expect("redeem");
    assert_eq!(outcome, RedeemOutcome::InvalidSignature);

    for garbage in ["", "not base64!", "AAAA", &signature.to_text()[..40]] {
        let outcome = verifier.redeem(&ticket.ticket_no, garbage).await.expect("redeem");
        assert_eq!(outcome, RedeemOutcome::InvalidSignature, "{garbage:?}");
    }

    let stored = ledger
        .find_ticket(&ticket.ticket_no)
        .await
        .expect("find")
        .expect("present");
    assert!(!stored.checked);
}

#[tokio::test]
async fn test_validly_signed_unknown_ticket() {
    let (_ledger, _issuer, verifier) = in_memory();
    let ticket_no = TicketNo::new("CYP999");
    let signature = keys().sign(ticket_no.as_bytes()).expect("sign");

    let outcome = verifier.redeem(&ticket_no, &signature.to_text()).await.expect("redeem");
    assert_eq!(outcome, RedeemOutcome::UnknownTicket);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_storage() {
    let (ledger, issuer, _verifier) = in_memory();

    for (name, email) in [
        ("Alice", "alice@example"),
        ("Alice", "not-an-email"),
        ("   ", "alice@example.com"),
    ] {
        let result = issuer.issue(name, email).await;
        assert!(matches!(result, Err(TicketError::InvalidInput(_))), "{name:?} {email:?}");
    }
    assert!(ledger.records().is_empty());
}

#[tokio::test]
async fn test_failed_attach_leaves_recoverable_unsigned_ticket() {
    let (ledger, issuer, verifier) = in_memory();
    ledger.fail_next_attach();

    let result = issuer.issue("Alice", "alice@example.com").await;
    assert!(matches!(result, Err(TicketError::LedgerUnavailable(_))));

    let unsigned = ledger.unsigned_tickets().await.expect("unsigned");
    assert_eq!(unsigned.len(), 1);
    assert_eq!(unsigned[0].ticket_no.as_str(), "CYP001");
    assert_eq!(ledger.stats().await.expect("stats").unsigned, 1);

    let completed = issuer.complete_unsigned().await.expect("recover");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, unsigned[0].id);
    assert!(ledger.unsigned_tickets().await.expect("unsigned").is_empty());

    // The next ticket continues the sequence; no id was reallocated.
    let bob = issuer.issue("Bob", "bob@example.com").await.expect("issue");
    assert_eq!(bob.ticket_no.as_str(), "CYP002");

    let sig = completed[0].signature_text().expect("signed");
    let outcome = verifier.redeem(&completed[0].ticket_no, &sig).await.expect("redeem");
    assert!(matches!(outcome, RedeemOutcome::Accepted(_)));
}

#[tokio::test]
async fn test_issue_returns_ticket_signed_by_concurrent_recovery() {
    let (ledger, issuer, verifier) = in_memory();
    ledger.preempt_next_attach();

    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    assert_eq!(ticket.ticket_no.as_str(), "CYP001");
    assert_eq!(ticket.name, "Alice");
    assert!(!ticket.is_unsigned());

    let stored = ledger
        .find_ticket(&ticket.ticket_no)
        .await
        .expect("find")
        .expect("present");
    assert_eq!(stored, ticket);
    assert_eq!(ledger.stats().await.expect("stats").total, 1);

    let sig = ticket.signature_text().expect("signed");
    let outcome = verifier.redeem(&ticket.ticket_no, &sig).await.expect("redeem");
    assert!(matches!(outcome, RedeemOutcome::Accepted(_)));
}

#[tokio::test]
async fn test_ledger_outage_is_an_error_not_an_outcome() {
    let (ledger, issuer, verifier) = in_memory();
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    ledger.set_unavailable(true);

    let sig = ticket.signature_text().expect("signed");
    let result = verifier.redeem(&ticket.ticket_no, &sig).await;
    assert!(matches!(result, Err(TicketError::LedgerUnavailable(_))));

    ledger.set_unavailable(false);
    let outcome = verifier.redeem(&ticket.ticket_no, &sig).await.expect("redeem");
    assert!(matches!(outcome, RedeemOutcome::Accepted(_)));
}

#[tokio::test]
async fn test_redeem_scanned_payload() {
    let (_ledger, issuer, verifier) = in_memory();
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    let sig = ticket.signature_text().expect("signed");

    let scanned = format!("\u{200B}{}\u{FF0C}{sig}", ticket.ticket_no);
    let outcome = verifier.redeem_payload(&scanned).await.expect("redeem");
    assert!(matches!(outcome, RedeemOutcome::Accepted(_)));

    let outcome = verifier.redeem_payload("CYP001").await.expect("redeem");
    assert_eq!(outcome, RedeemOutcome::InvalidSignature);
}

#[tokio::test]
async fn test_delivery_failure_does_not_undo_issuance() {
    let (ledger, issuer, verifier) = in_memory();
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");

    let report = deliver(&MockRenderer::failing(), &MockNotifier::new(), &ticket).await;
    assert!(matches!(report, DeliveryReport::RenderFailed(_)));

    let failing = MockNotifier::failing();
    let report = deliver(&MockRenderer::new(), &failing, &ticket).await;
    assert!(matches!(report, DeliveryReport::NotifyFailed(_)));

    let notifier = MockNotifier::new();
    let report = deliver(&MockRenderer::new(), &notifier, &ticket).await;
    assert!(report.is_delivered());
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "alice@example.com");
    assert_eq!(sent[0].artifact.file_name, "CYP001.txt");

    assert_eq!(ledger.stats().await.expect("stats").total, 1);
    let sig = ticket.signature_text().expect("signed");
    let outcome = verifier.redeem(&ticket.ticket_no, &sig).await.expect("redeem");
    assert!(matches!(outcome, RedeemOutcome::Accepted(_)));
}

// ═══════════════════════════════════════════════════════════
// Concurrency
// ═══════════════════════════════════════════════════════════

async fn race_redemptions<L>(verifier: Arc<TicketVerifier<L>>, ticket_no: TicketNo, sig: String, n: usize)
where
    L: TicketLedger + 'static,
{
    let mut handles = Vec::with_capacity(n);
    for _ in 0..n {
        let verifier = Arc::clone(&verifier);
        let ticket_no = ticket_no.clone();
        let sig = sig.clone();
        handles.push(tokio::spawn(async move { verifier.redeem(&ticket_no, &sig).await }));
    }

    let mut accepted = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.expect("task").expect("redeem") {
            RedeemOutcome::Accepted(_) => accepted += 1,
            RedeemOutcome::AlreadyChecked(_) => already += 1,
            other => unreachable!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(accepted, 1, "exactly one redemption must be accepted");
    assert_eq!(already, n - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_redemption_in_memory() {
    let (_ledger, issuer, verifier) = in_memory();
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    let sig = ticket.signature_text().expect("signed");

    race_redemptions(Arc::new(verifier), ticket.ticket_no, sig, 64).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_redemption_across_file_handles() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ledger.jsonl");
    let keys = keys();

    let first = Arc::new(
        FlatFileLedger::open(&path, format(), Duration::from_secs(10)).expect("open first"),
    );
    let second = Arc::new(
        FlatFileLedger::open(&path, format(), Duration::from_secs(10)).expect("open second"),
    );

    let issuer = TicketIssuer::new(Arc::clone(&first), Arc::clone(&keys));
    let ticket = issuer.issue("Alice", "alice@example.com").await.expect("issue");
    let sig = ticket.signature_text().expect("signed");

    let verifiers = [
        Arc::new(TicketVerifier::new(first, keys.public_key().clone())),
        Arc::new(TicketVerifier::new(second, keys.public_key().clone())),
    ];
    let mut handles = Vec::new();
    for i in 0..32 {
        let verifier = Arc::clone(&verifiers[i % 2]);
        let ticket_no = ticket.ticket_no.clone();
        let sig = sig.clone();
        handles.push(tokio::spawn(async move { verifier.redeem(&ticket_no, &sig).await }));
    }

    let accepted = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task").expect("redeem"))
        .filter(|outcome| matches!(outcome, RedeemOutcome::Accepted(_)))
        .count();
    assert_eq!(accepted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_issuance_assigns_unique_numbers() {
    let ledger = Arc::new(InMemoryLedger::new(format()));
    let issuer = Arc::new(TicketIssuer::new(Arc::clone(&ledger), keys()));

    let mut handles = Vec::new();
    for i in 0..50 {
        let issuer = Arc::clone(&issuer);
        handles.push(tokio::spawn(async move {
            issuer
                .issue(&format!("Guest {i}"), &format!("guest{i}@example.com"))
                .await
        }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.expect("task").expect("issue").ticket_no);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 50);
    assert_eq!(numbers[0].as_str(), "CYP001");
    assert_eq!(numbers[49].as_str(), "CYP050");
}

#[tokio::test]
async fn test_sequential_numbers_strictly_increase() {
    let (_ledger, issuer, _verifier) = in_memory();
    let format = format();

    let mut previous = 0;
    for i in 0..20 {
        let ticket = issuer
            .issue("Guest", &format!("guest{i}@example.com"))
            .await
            .expect("issue");
        let id = format.parse(ticket.ticket_no.as_str()).expect("parses").get();
        assert!(id > previous);
        previous = id;
    }
}
