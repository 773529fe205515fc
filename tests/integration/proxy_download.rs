#![cfg(feature = "integration")]
use devhost::proxy::install::{install, BINARY_NAME};

#[tokio::test]
async fn downloads_the_release_binary() {
    let dir = tempfile::TempDir::new().unwrap();
    let dest = dir.path().join("bin").join(BINARY_NAME);
    install("v3.0.0", &dest).await.unwrap();
    let meta = std::fs::metadata(&dest).unwrap();
    assert!(meta.len() > 1_000_000);
}
