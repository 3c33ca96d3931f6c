//! Streaming SHA-256 over a byte stream.

use futures::StreamExt;
use sha2::{Digest, Sha256};

use cloudvid_core::result::AppResult;
use cloudvid_core::traits::ByteStream;

/// Hex-encoded SHA-256 of everything the stream yields.
pub async fn sha256_stream(mut stream: ByteStream) -> AppResult<String> {
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
