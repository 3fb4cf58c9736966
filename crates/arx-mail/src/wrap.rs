//! Envelope wrap/unwrap and hop headers.

use chrono::Days;

use arx_crypto::box_;
use arx_docs::types::{Envelope, HeaderOp, Mail};
use arx_docs::{now_utc, DocKind, Document, Portfolio, PrivatePortfolio, Stamp};

use crate::{MailError, Result};

/// Envelope lifetime from posting.
const ENVELOPE_DAYS: u64 = 30;

/// Seal a signed mail from `sender` to `recipient`.
///
/// The mail must already be signed by the sender and addressed
/// sender → recipient. The canonical mail bytes are box-sealed for the
/// recipient's current public key, the envelope is signed excluding its
/// headers, and a SEND header is appended.
pub fn wrap(
    sender: &PrivatePortfolio,
    recipient: &Portfolio,
    mail: &Mail,
) -> Result<Envelope> {
    sender.portfolio.validate_message(mail)?;
    if mail.owner != recipient.id() {
        return Err(MailError::Misaddressed("mail not owned by recipient"));
    }

    let recipient_keys = recipient.current_keys()?;
    let sealed = box_::seal(
        &sender.privkeys.box_secret()?,
        &recipient_keys.public,
        &mail.serialize(),
    )?;

    let posted = now_utc();
    let today = posted.date_naive();
    let mut stamp = Stamp::new(sender.id(), DocKind::Envelope);
    stamp.created = today;
    stamp.expires = today + Days::new(ENVELOPE_DAYS);
    let mut envelope = Envelope {
        stamp,
        owner: recipient.id(),
        sealed,
        posted,
        headers: Vec::new(),
    };

    let pair = sender.sign_pair()?;
    envelope.sign(&pair.secret);
    envelope.add_header(HeaderOp::Send, sender.id(), &pair.secret)?;
    tracing::debug!(
        target: "mail",
        envelope = %envelope.stamp.id,
        recipient = %recipient.id(),
        "wrapped mail"
    );
    Ok(envelope)
}

/// Open an envelope at its final recipient.
///
/// Verifies the envelope signature (headers excluded) and the inner mail's
/// signature against the sender's published keys; every failure surfaces as
/// its specific error, nothing malformed passes silently.
pub fn open(
    recipient: &PrivatePortfolio,
    sender: &Portfolio,
    envelope: &Envelope,
) -> Result<Mail> {
    sender.validate_envelope(envelope)?;
    if envelope.owner != recipient.id() {
        return Err(MailError::Misaddressed("envelope owned by someone else"));
    }

    let sender_keys = sender.current_keys()?;
    let plain = box_::open(
        &recipient.privkeys.box_secret()?,
        &sender_keys.public,
        &envelope.sealed,
    )?;

    let mail = Mail::deserialize(&plain)?;
    sender.validate_message(&mail)?;
    if mail.owner != recipient.id() {
        return Err(MailError::Misaddressed("inner mail not owned by recipient"));
    }
    Ok(mail)
}

/// Append a RECEIVE header once the envelope reaches its owner's node.
pub fn receive(recipient: &PrivatePortfolio, envelope: &mut Envelope) -> Result<()> {
    if envelope.owner != recipient.id() {
        return Err(MailError::Misaddressed("receive at a non-owner node"));
    }
    let pair = recipient.sign_pair()?;
    envelope.add_header(HeaderOp::Receive, recipient.id(), &pair.secret)?;
    Ok(())
}

/// Append a ROUTE header at a forwarding hop. Refused after RECEIVE.
pub fn route(hop: &PrivatePortfolio, envelope: &mut Envelope) -> Result<()> {
    let pair = hop.sign_pair()?;
    envelope.add_header(HeaderOp::Route, hop.id(), &pair.secret)?;
    Ok(())
}

/// Sign and date a fresh mail for sending; convenience for callers that
/// build the mail inline.
pub fn compose_signed(
    sender: &PrivatePortfolio,
    recipient: &Portfolio,
    subject: &str,
    body: &str,
) -> Result<Mail> {
    let mut mail = Mail::compose(sender.id(), recipient.id(), subject, body);
    sender.issue(&mut mail)?;
    Ok(mail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arx_docs::types::entity::{Entity, Person};
    use chrono::NaiveDate;

    fn portfolio(name: &str) -> PrivatePortfolio {
        let person = Person::create(
            name,
            "Test",
            &[name],
            "undefined",
            NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        );
        PrivatePortfolio::setup(Entity::Person(person)).unwrap()
    }

    #[test]
    fn wrap_open_roundtrip() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let mail = compose_signed(&alice, &bob.portfolio, "hi", "x").unwrap();
        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        assert_eq!(envelope.headers.len(), 1);
        assert_eq!(envelope.headers[0].op, HeaderOp::Send);

        let opened = open(&bob, &alice.portfolio, &envelope).unwrap();
        assert_eq!(opened, mail);
    }

    #[test]
    fn tampered_seal_is_crypto_failure() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let mail = compose_signed(&alice, &bob.portfolio, "hi", "x").unwrap();
        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();

        for i in 0..envelope.sealed.len() {
            let mut bad = envelope.clone();
            bad.sealed[i] ^= 0x01;
            match open(&bob, &alice.portfolio, &bad) {
                // either the envelope signature or the box must fail
                Err(MailError::Crypto(arx_crypto::CryptoError::CryptoFailure))
                | Err(MailError::Doc(arx_docs::DocError::Crypto(
                    arx_crypto::CryptoError::CryptoFailure,
                ))) => {}
                other => panic!("byte {i}: expected CryptoFailure, got {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let carol = portfolio("Carol");
        let mail = compose_signed(&alice, &bob.portfolio, "hi", "x").unwrap();
        let envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        assert!(open(&carol, &alice.portfolio, &envelope).is_err());
    }

    #[test]
    fn mail_must_match_parties() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let carol = portfolio("Carol");
        // addressed to carol but wrapped for bob
        let mail = compose_signed(&alice, &carol.portfolio, "hi", "x").unwrap();
        assert!(matches!(
            wrap(&alice, &bob.portfolio, &mail),
            Err(MailError::Misaddressed(_))
        ));
    }

    #[test]
    fn hop_headers_round() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let relay = portfolio("Relay");
        let mail = compose_signed(&alice, &bob.portfolio, "hi", "x").unwrap();
        let mut envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();

        route(&relay, &mut envelope).unwrap();
        receive(&bob, &mut envelope).unwrap();
        assert_eq!(envelope.headers.len(), 3);
        envelope.validate().unwrap();

        // no routing after receive
        assert!(route(&relay, &mut envelope).is_err());
        // signature still intact after all appends
        open(&bob, &alice.portfolio, &envelope).unwrap();
    }

    #[test]
    fn receive_only_at_owner() {
        let alice = portfolio("Alice");
        let bob = portfolio("Bob");
        let carol = portfolio("Carol");
        let mail = compose_signed(&alice, &bob.portfolio, "hi", "x").unwrap();
        let mut envelope = wrap(&alice, &bob.portfolio, &mail).unwrap();
        assert!(matches!(
            receive(&carol, &mut envelope),
            Err(MailError::Misaddressed(_))
        ));
    }
}
