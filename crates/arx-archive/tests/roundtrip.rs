//! Whole-archive round-trip properties: content survives write/load across
//! block-size choices, digests match BLAKE2b of the plaintext, and block
//! accounting stays balanced.

use arx_archive::{ArchiveFs, ArchiveHeader, FileOptions, RemoveMode};
use arx_crypto::hash::digest64;
use arx_crypto::SecretBytes;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

fn header() -> ArchiveHeader {
    ArchiveHeader::new(
        arx_archive::header::kind::VAULT,
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
    )
}

#[tokio::test]
async fn content_roundtrip_across_block_sizes() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for block_size in [128u16, 256, 512, 1024] {
        let dir = tempfile::tempdir().unwrap();
        let master = SecretBytes::new(arx_crypto::random_array());
        let fs = ArchiveFs::create(dir.path().join("a.arx"), &master, header(), block_size)
            .await
            .unwrap();
        fs.mkdir("/data").await.unwrap();

        for i in 0..8 {
            let len = rng.gen_range(0..5000);
            let body: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let path = format!("/data/f{i}");
            fs.mkfile(&path, &body, FileOptions::default()).await.unwrap();
            let loaded = fs.load(&path).await.unwrap();
            assert_eq!(loaded, body, "block_size={block_size} file={i}");
            assert_eq!(fs.stat(&path).await.unwrap().digest, digest64(&body));
        }
    }
}

#[tokio::test]
async fn reopen_after_churn_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.arx");
    let master = SecretBytes::new(arx_crypto::random_array());
    {
        let fs = ArchiveFs::create(&path, &master, header(), 512).await.unwrap();
        fs.mkdir("/keep").await.unwrap();
        fs.mkfile("/keep/a", &[1u8; 1500], FileOptions::default())
            .await
            .unwrap();
        fs.mkfile("/keep/b", &[2u8; 700], FileOptions::default())
            .await
            .unwrap();
        fs.remove("/keep/a", RemoveMode::Hard).await.unwrap();
        fs.save("/keep/b", &[3u8; 2100], None).await.unwrap();
    }
    let fs = ArchiveFs::open(&path, &master).await.unwrap();
    assert_eq!(fs.load("/keep/b").await.unwrap(), vec![3u8; 2100]);
    assert!(!fs.isfile("/keep/a").await);
    // freed blocks from the hard remove are allocatable again
    fs.mkfile("/keep/c", &[4u8; 1400], FileOptions::default())
        .await
        .unwrap();
    assert_eq!(fs.load("/keep/c").await.unwrap(), vec![4u8; 1400]);
}
