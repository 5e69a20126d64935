//! On-disk and on-wire layout of an encrypted backup payload.
//!
//! ```text
//! byte[16]  IV
//! byte[]    ciphertext
//! byte[16]  GCM tag
//! ```
//!
//! There is no length prefix: IV and tag lengths are fixed, so the ciphertext
//! is whatever lies between them.

use crate::{BackupError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// IV length in bytes
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Smallest valid envelope: IV and tag around an empty ciphertext
pub const MIN_ENVELOPE_LEN: usize = IV_LEN + TAG_LEN;

/// One sealed backup payload split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Per-encryption random IV
    pub iv: [u8; IV_LEN],
    /// AES-256-GCM ciphertext, same length as the compressed plaintext
    pub ciphertext: Vec<u8>,
    /// GCM tag
    pub tag: [u8; TAG_LEN],
}

impl Envelope {
    /// Assemble an envelope from its parts
    pub fn new(iv: [u8; IV_LEN], ciphertext: Vec<u8>, tag: [u8; TAG_LEN]) -> Self {
        Self { iv, ciphertext, tag }
    }

    /// Serialize as IV ‖ ciphertext ‖ tag
    pub fn to_bytes(&self) -> Vec<u8> {
        frame(&self.iv, &self.ciphertext, &self.tag)
    }

    /// Parse a complete payload
    pub fn from_bytes(blob: &[u8]) -> Result<Self> {
        unframe(blob)
    }

    /// Total framed length
    pub fn len(&self) -> usize {
        MIN_ENVELOPE_LEN + self.ciphertext.len()
    }

    /// True when the ciphertext is empty (the frame itself never is)
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Read an envelope from a stream.
    ///
    /// The IV is taken only once all 16 bytes have arrived, however the reader
    /// chooses to chunk its output.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut iv = [0u8; IV_LEN];
        reader.read_exact(&mut iv).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                BackupError::MalformedEnvelope(format!(
                    "payload ended before the {IV_LEN}-byte IV"
                ))
            } else {
                BackupError::Io(format!("Failed to read envelope IV: {}", e))
            }
        })?;

        let mut rest = Vec::new();
        reader
            .read_to_end(&mut rest)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read envelope body: {}", e)))?;

        if rest.len() < TAG_LEN {
            return Err(BackupError::MalformedEnvelope(format!(
                "payload is {} bytes, need at least {}",
                IV_LEN + rest.len(),
                MIN_ENVELOPE_LEN
            )));
        }

        let tag_start = rest.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&rest[tag_start..]);
        rest.truncate(tag_start);

        Ok(Self {
            iv,
            ciphertext: rest,
            tag,
        })
    }
}

/// Concatenate IV ‖ ciphertext ‖ tag
pub fn frame(iv: &[u8; IV_LEN], ciphertext: &[u8], tag: &[u8; TAG_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_ENVELOPE_LEN + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tag);
    out
}

/// Split a payload into IV, ciphertext and tag
pub fn unframe(blob: &[u8]) -> Result<Envelope> {
    if blob.len() < MIN_ENVELOPE_LEN {
        return Err(BackupError::MalformedEnvelope(format!(
            "payload is {} bytes, need at least {}",
            blob.len(),
            MIN_ENVELOPE_LEN
        )));
    }

    let (iv_bytes, rest) = blob.split_at(IV_LEN);
    let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(iv_bytes);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_bytes);

    Ok(Envelope {
        iv,
        ciphertext: ciphertext.to_vec(),
        tag,
    })
}
