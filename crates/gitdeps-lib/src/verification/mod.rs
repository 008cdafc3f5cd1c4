pub mod content_digest_hasher;

pub use content_digest_hasher::{
    ContentDigestVerifier, ContentHasher, VerificationError, hash_file, hashes_equal,
};
