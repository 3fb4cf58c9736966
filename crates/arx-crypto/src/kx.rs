//! Key-exchange session keys with client/server role asymmetry.
//!
//! Both sides compute `q = X25519(own_secret, remote_public)` and hash
//! `BLAKE2b-64(q || client_pk || server_pk)`. The 64-byte digest splits into
//! two 32-byte session keys; the client takes `(rx, tx) = (first, second)`
//! and the server the swap, so each side's `tx` is the other's `rx`.

use crate::{key32, Result, SecretBytes};

/// Session key pair: `rx` opens inbound traffic, `tx` seals outbound.
pub struct SessionKeys {
    pub rx: SecretBytes<32>,
    pub tx: SecretBytes<32>,
}

fn session_digest(
    secret: &SecretBytes<32>,
    remote_public: &[u8],
    client_pk: &[u8; 32],
    server_pk: &[u8; 32],
) -> Result<[u8; 64]> {
    let sk = x25519_dalek::StaticSecret::from(*secret.expose());
    let pk = x25519_dalek::PublicKey::from(key32(remote_public)?);
    let shared = sk.diffie_hellman(&pk);

    let mut input = Vec::with_capacity(96);
    input.extend_from_slice(shared.as_bytes());
    input.extend_from_slice(client_pk);
    input.extend_from_slice(server_pk);
    let hash = blake2b_simd::Params::new().hash_length(64).hash(&input);
    let mut out = [0u8; 64];
    out.copy_from_slice(hash.as_bytes());
    Ok(out)
}

fn split(digest: [u8; 64], swap: bool) -> SessionKeys {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&digest[..32]);
    second.copy_from_slice(&digest[32..]);
    if swap {
        SessionKeys {
            rx: SecretBytes::new(second),
            tx: SecretBytes::new(first),
        }
    } else {
        SessionKeys {
            rx: SecretBytes::new(first),
            tx: SecretBytes::new(second),
        }
    }
}

/// Session keys for the connecting side.
pub fn kx_client(
    secret: &SecretBytes<32>,
    public: &[u8; 32],
    remote_public: &[u8],
) -> Result<SessionKeys> {
    let server_pk = key32(remote_public)?;
    let digest = session_digest(secret, remote_public, public, &server_pk)?;
    Ok(split(digest, false))
}

/// Session keys for the accepting side.
pub fn kx_server(
    secret: &SecretBytes<32>,
    public: &[u8; 32],
    remote_public: &[u8],
) -> Result<SessionKeys> {
    let client_pk = key32(remote_public)?;
    let digest = session_digest(secret, remote_public, &client_pk, public)?;
    Ok(split(digest, true))
}
