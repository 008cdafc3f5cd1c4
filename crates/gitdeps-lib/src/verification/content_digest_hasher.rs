use digest::Digest;
use sha1::Sha1;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Verification failed for {subject}: expected {expected}, got {actual}")]
    VerificationFailed {
        subject: String,
        expected: String,
        actual: String,
    },
}

/// Running SHA-1 over a byte stream, rendered as lowercase hex.
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Sha1,
}

impl ContentHasher {
    #[inline]
    pub fn new() -> Self {
        Self {
            hasher: Sha1::new(),
        }
    }

    #[inline]
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        Digest::update(&mut self.hasher, data.as_ref());
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Verifies a stream against a known hex digest.
pub struct ContentDigestVerifier {
    hasher: ContentHasher,
    expected_digest: String,
}

impl ContentDigestVerifier {
    #[inline]
    pub fn new(expected_digest: impl Into<String>) -> Self {
        Self {
            hasher: ContentHasher::new(),
            expected_digest: expected_digest.into(),
        }
    }

    #[inline]
    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.hasher.update(data);
    }

    pub fn verify(self, subject: impl Into<String>) -> Result<(), VerificationError> {
        let actual_digest = self.hasher.finalize_hex();
        if hashes_equal(&actual_digest, &self.expected_digest) {
            Ok(())
        } else {
            Err(VerificationError::VerificationFailed {
                subject: subject.into(),
                expected: self.expected_digest,
                actual: actual_digest,
            })
        }
    }
}

pub fn hashes_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Hashes a file by streaming it, without loading it into memory.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize_hex())
}
