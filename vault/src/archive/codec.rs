//! # Record codec
//!
//! Pure, file-independent encoding of record payloads. A stored
//! payload is laid out as `[hash][body]`, where the optional 20-byte
//! hash is the SHA-1 of the uncompressed payload and the body is the
//! payload itself, zlib-compressed when requested.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use sha1::{Digest, Sha1};
use tracing::trace;

use super::{Error, Features, Result};

/// The length of a content hash prefix.
pub const HASH_LEN: usize = 20;

/// Compute the content hash of the given bytes.
pub fn hash(bytes: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Encode a payload according to the given features.
pub fn encode(payload: &[u8], features: Features) -> Result<Vec<u8>> {
    let mut stored = Vec::with_capacity(payload.len() + HASH_LEN);

    if features.is_hashed() {
        stored.extend_from_slice(&hash(payload));
    }

    if features.is_compressed() {
        let mut encoder = ZlibEncoder::new(stored, Compression::default());
        encoder
            .write_all(payload)
            .map_err(Error::CompressPayloadError)?;
        stored = encoder.finish().map_err(Error::CompressPayloadError)?;
    } else {
        stored.extend_from_slice(payload);
    }

    trace!(
        len = payload.len(),
        stored = stored.len(),
        features = features.bits(),
        "encoded payload"
    );

    Ok(stored)
}

/// Decode a stored payload according to the given features.
///
/// For hashed payloads, anything preventing the recomputed hash from
/// matching the stored one is an integrity error, including a body
/// that no longer decompresses.
pub fn decode(stored: &[u8], features: Features) -> Result<Vec<u8>> {
    let (expected, body) = if features.is_hashed() {
        if stored.len() < HASH_LEN {
            return Err(Error::MissingHashError(stored.len()));
        }
        let (expected, body) = stored.split_at(HASH_LEN);
        (Some(expected), body)
    } else {
        (None, stored)
    };

    let payload = if features.is_compressed() {
        let mut payload = Vec::with_capacity(body.len() * 2);
        let decompressed = ZlibDecoder::new(body).read_to_end(&mut payload);
        match (decompressed, expected) {
            (Ok(_), _) => payload,
            (Err(_), Some(expected)) => {
                return Err(Error::IntegrityError {
                    expected: to_hex(expected),
                    actual: String::from("undecompressable body"),
                })
            }
            (Err(err), None) => return Err(Error::DecompressPayloadError(err)),
        }
    } else {
        body.to_vec()
    };

    if let Some(expected) = expected {
        let actual = hash(&payload);
        if expected != actual {
            return Err(Error::IntegrityError {
                expected: to_hex(expected),
                actual: to_hex(&actual),
            });
        }
    }

    Ok(payload)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn all_features() -> [Features; 4] {
        [
            Features::NONE,
            Features::HASHED,
            Features::COMPRESSED,
            Features::HASHED | Features::COMPRESSED,
        ]
    }

    fn message() -> Vec<u8> {
        b"From: alice@localhost\r\nTo: bob@localhost\r\nSubject: hello\r\n\r\nHello, world!\r\n"
            .repeat(8)
    }

    #[test]
    fn hash_is_sha1() {
        assert_eq!(
            to_hex(&hash(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn hash_prefixes_stored_payload() {
        let payload = message();
        let stored = encode(&payload, Features::HASHED).unwrap();
        assert_eq!(&stored[..HASH_LEN], &hash(&payload));
        assert_eq!(&stored[HASH_LEN..], &payload[..]);
    }

    #[test]
    fn compression_shrinks_repetitive_payload() {
        let payload = message();
        let stored = encode(&payload, Features::COMPRESSED).unwrap();
        assert!(stored.len() < payload.len());
    }

    #[test]
    fn decode_empty_hashed_payload() {
        let stored = encode(b"", Features::HASHED | Features::COMPRESSED).unwrap();
        assert_eq!(
            decode(&stored, Features::HASHED | Features::COMPRESSED).unwrap(),
            b""
        );
    }

    #[test]
    fn short_hashed_payload_is_rejected() {
        let err = decode(&[0; 4], Features::HASHED).unwrap_err();
        assert!(matches!(err, Error::MissingHashError(4)), "{err:?}");
    }

    #[test]
    fn any_flipped_byte_breaks_integrity() {
        let payload = message();

        for features in [Features::HASHED, Features::HASHED | Features::COMPRESSED] {
            let stored = encode(&payload, features).unwrap();

            for i in 0..stored.len() {
                let mut tampered = stored.clone();
                tampered[i] ^= 0xff;
                let err = decode(&tampered, features).unwrap_err();
                assert!(
                    err.is_integrity_error(),
                    "byte {i} with features {features:?}: {err:?}"
                );
            }
        }
    }

    #[test]
    fn corrupted_unhashed_body_fails_to_decompress() {
        let mut stored = encode(&message(), Features::COMPRESSED).unwrap();
        stored.truncate(stored.len() / 2);
        let err = decode(&stored, Features::COMPRESSED).unwrap_err();
        assert!(matches!(err, Error::DecompressPayloadError(_)), "{err:?}");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(payload in proptest::collection::vec(any::<u8>(), 0..2048), i in 0usize..4) {
            let features = all_features()[i];
            let stored = encode(&payload, features).unwrap();
            prop_assert_eq!(decode(&stored, features).unwrap(), payload);
        }
    }
}
