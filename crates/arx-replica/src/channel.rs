//! Authenticated, encrypted packet channel.
//!
//! Peers identify with Ed25519 host keys; an ephemeral X25519 exchange
//! (client/server role asymmetry) yields one session key per direction.
//! A frame is `u32 total_len` followed by sealed records: each record's
//! plaintext length travels in a single byte, so a payload longer than 255
//! bytes splits across records, every record sealed with
//! XChaCha20-Poly1305 under its own counter nonce. The stringified node
//! UUID doubles as the peer's user name on the wire.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use arx_crypto::sign::{sign_detached, verify_detached, SignKeypair};
use arx_crypto::{aead, box_::BoxKeypair, kx, SecretBytes, MAC_SIZE};

use crate::packet::{Packet, CHUNK_SIZE};
use crate::{ReplicaError, Result};

const HELLO_CONTEXT: &[u8] = b"arx/channel/v1";
const FRAME_AAD: &[u8] = b"arx/frame";
/// Hard ceiling on one frame's plaintext: one data chunk plus headroom.
const FRAME_MAX: usize = CHUNK_SIZE + 1024;
/// A record length is one byte on the wire.
const RECORD_MAX: usize = 255;
/// eph(32) || verify(32) || node(16) || sig(64).
const HELLO_LEN: usize = 144;

/// This node's wire identity.
pub struct HostIdentity {
    pub sign: SignKeypair,
    pub node: Uuid,
}

impl HostIdentity {
    pub fn generate(node: Uuid) -> Self {
        HostIdentity {
            sign: SignKeypair::generate(),
            node,
        }
    }
}

/// The authenticated remote end.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub verify: [u8; 32],
    pub node: Uuid,
}

impl PeerInfo {
    /// Stringified node UUID, the user name of the peer.
    pub fn user(&self) -> String {
        self.node.to_string()
    }
}

/// Encrypted packet stream over any byte transport.
pub struct SecureChannel<S> {
    io: S,
    rx_key: SecretBytes<32>,
    tx_key: SecretBytes<32>,
    rx_counter: u64,
    tx_counter: u64,
    peer: PeerInfo,
}

fn hello_bytes(eph_pub: &[u8; 32], identity: &HostIdentity) -> Vec<u8> {
    let mut signable = Vec::with_capacity(HELLO_CONTEXT.len() + 48);
    signable.extend_from_slice(HELLO_CONTEXT);
    signable.extend_from_slice(eph_pub);
    signable.extend_from_slice(identity.node.as_bytes());
    let sig = sign_detached(&identity.sign.secret, &signable);

    let mut hello = Vec::with_capacity(HELLO_LEN);
    hello.extend_from_slice(eph_pub);
    hello.extend_from_slice(&identity.sign.verify);
    hello.extend_from_slice(identity.node.as_bytes());
    hello.extend_from_slice(&sig);
    hello
}

fn parse_hello(hello: &[u8; HELLO_LEN]) -> Result<([u8; 32], PeerInfo)> {
    let eph: [u8; 32] = hello[0..32].try_into().expect("32 bytes");
    let verify: [u8; 32] = hello[32..64].try_into().expect("32 bytes");
    let node = Uuid::from_slice(&hello[64..80]).expect("16 bytes");
    let sig = &hello[80..144];

    let mut signable = Vec::with_capacity(HELLO_CONTEXT.len() + 48);
    signable.extend_from_slice(HELLO_CONTEXT);
    signable.extend_from_slice(&eph);
    signable.extend_from_slice(node.as_bytes());
    verify_detached(&verify, sig, &signable)
        .map_err(|_| ReplicaError::Protocol("peer hello signature invalid".into()))?;
    Ok((eph, PeerInfo { verify, node }))
}

fn frame_nonce(counter: u64) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[16..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SecureChannel<S> {
    /// Connect as the client. `expected_host` pins the server's Ed25519
    /// verify key when the caller already knows it.
    pub async fn connect(
        mut io: S,
        identity: &HostIdentity,
        expected_host: Option<&[u8; 32]>,
    ) -> Result<Self> {
        let eph = BoxKeypair::generate();
        io.write_all(&hello_bytes(&eph.public, identity)).await?;
        io.flush().await?;

        let mut hello = [0u8; HELLO_LEN];
        io.read_exact(&mut hello).await?;
        let (peer_eph, peer) = parse_hello(&hello)?;
        if let Some(expected) = expected_host {
            if *expected != peer.verify {
                return Err(ReplicaError::Protocol("unexpected host key".into()));
            }
        }

        let keys = kx::kx_client(&eph.secret, &eph.public, &peer_eph)?;
        tracing::debug!(target: "replica", peer = %peer.user(), "channel up (client)");
        Ok(SecureChannel {
            io,
            rx_key: keys.rx,
            tx_key: keys.tx,
            rx_counter: 0,
            tx_counter: 0,
            peer,
        })
    }

    /// Accept as the server.
    pub async fn accept(mut io: S, identity: &HostIdentity) -> Result<Self> {
        let mut hello = [0u8; HELLO_LEN];
        io.read_exact(&mut hello).await?;
        let (peer_eph, peer) = parse_hello(&hello)?;

        let eph = BoxKeypair::generate();
        io.write_all(&hello_bytes(&eph.public, identity)).await?;
        io.flush().await?;

        let keys = kx::kx_server(&eph.secret, &eph.public, &peer_eph)?;
        tracing::debug!(target: "replica", peer = %peer.user(), "channel up (server)");
        Ok(SecureChannel {
            io,
            rx_key: keys.rx,
            tx_key: keys.tx,
            rx_counter: 0,
            tx_counter: 0,
            peer,
        })
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        let plain = packet.encode();
        if plain.is_empty() || plain.len() > FRAME_MAX {
            return Err(ReplicaError::Protocol(format!(
                "frame of {} bytes",
                plain.len()
            )));
        }
        self.io
            .write_all(&(plain.len() as u32).to_be_bytes())
            .await?;
        for record in plain.chunks(RECORD_MAX) {
            let nonce = frame_nonce(self.tx_counter);
            self.tx_counter += 1;
            let sealed = aead::seal_detached(self.tx_key.expose(), &nonce, FRAME_AAD, record)?;
            self.io.write_all(&[record.len() as u8]).await?;
            self.io.write_all(&sealed).await?;
        }
        self.io.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        let mut len_buf = [0u8; 4];
        self.io.read_exact(&mut len_buf).await?;
        let total = u32::from_be_bytes(len_buf) as usize;
        if total == 0 || total > FRAME_MAX {
            return Err(ReplicaError::Protocol(format!("frame of {total} bytes")));
        }
        let mut plain = Vec::with_capacity(total);
        while plain.len() < total {
            let mut len_byte = [0u8; 1];
            self.io.read_exact(&mut len_byte).await?;
            let record_len = len_byte[0] as usize;
            // the sender fills records to the brim, so every length is
            // determined by what is still missing
            let expected = RECORD_MAX.min(total - plain.len());
            if record_len != expected {
                return Err(ReplicaError::Protocol(format!(
                    "record of {record_len} bytes, expected {expected}"
                )));
            }
            let mut sealed = vec![0u8; record_len + MAC_SIZE];
            self.io.read_exact(&mut sealed).await?;
            let nonce = frame_nonce(self.rx_counter);
            self.rx_counter += 1;
            let record = aead::open_detached(self.rx_key.expose(), &nonce, FRAME_AAD, &sealed)
                .map_err(|_| ReplicaError::Protocol("frame failed authentication".into()))?;
            plain.extend_from_slice(&record);
        }
        Packet::decode(&plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packets_cross_the_channel() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let client_id = HostIdentity::generate(Uuid::new_v4());
        let server_id = HostIdentity::generate(Uuid::new_v4());

        let server = tokio::spawn(async move {
            let mut channel = SecureChannel::accept(server_io, &server_id).await.unwrap();
            let packet = channel.recv().await.unwrap();
            assert_eq!(packet, Packet::Init { version: 1 });
            channel.send(&Packet::Version { version: 1 }).await.unwrap();
        });

        let mut channel = SecureChannel::connect(client_io, &client_id, None)
            .await
            .unwrap();
        channel.send(&Packet::Init { version: 1 }).await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), Packet::Version { version: 1 });
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_payloads_split_across_records() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let client_id = HostIdentity::generate(Uuid::new_v4());
        let server_id = HostIdentity::generate(Uuid::new_v4());

        // well past the one-byte record length, and not a multiple of it
        let big = Packet::Chunk(crate::packet::ChunkPayload::Data {
            piece: 0,
            data: (0..5000u32).map(|i| (i % 251) as u8).collect(),
        });
        let small = Packet::Done;

        let expected = big.clone();
        let server = tokio::spawn(async move {
            let mut channel = SecureChannel::accept(server_io, &server_id).await.unwrap();
            assert_eq!(channel.recv().await.unwrap(), expected);
            // counters stay in lockstep across the record boundary
            assert_eq!(channel.recv().await.unwrap(), Packet::Done);
            channel.send(&Packet::Close).await.unwrap();
        });

        let mut channel = SecureChannel::connect(client_io, &client_id, None)
            .await
            .unwrap();
        channel.send(&big).await.unwrap();
        channel.send(&small).await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), Packet::Close);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn host_key_pinning() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let client_id = HostIdentity::generate(Uuid::new_v4());
        let server_id = HostIdentity::generate(Uuid::new_v4());
        let wrong_key = SignKeypair::generate().verify;

        let server = tokio::spawn(async move {
            // accept may fail when the client hangs up on pin mismatch
            let _ = SecureChannel::accept(server_io, &server_id).await;
        });

        let result = SecureChannel::connect(client_io, &client_id, Some(&wrong_key)).await;
        assert!(matches!(result, Err(ReplicaError::Protocol(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_user_is_node_uuid() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let node = Uuid::new_v4();
        let client_id = HostIdentity::generate(node);
        let server_id = HostIdentity::generate(Uuid::new_v4());

        let server = tokio::spawn(async move {
            let channel = SecureChannel::accept(server_io, &server_id).await.unwrap();
            channel.peer().user()
        });
        let _client = SecureChannel::connect(client_io, &client_id, None)
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), node.to_string());
    }
}
