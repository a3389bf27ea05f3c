//! Content fingerprints and the streaming hasher.

use crate::error::{Error, Result};
use crate::source::ByteSource;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Read};

/// A content-derived file identifier: SHA-256 over the full byte content.
///
/// Serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Fingerprint an in-memory buffer in one call.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = FingerprintHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Parse from a hex string. Upper-case digits are accepted.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(Error::InvalidFingerprint(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(pair)
                .map_err(|e| Error::InvalidFingerprint(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| Error::InvalidFingerprint(format!("{s}: {e}")))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_hex()
    }
}

/// Incremental SHA-256 accumulator.
///
/// The digest depends only on the concatenation of the bytes fed to
/// [`update`](Self::update), never on how they were split.
#[derive(Clone, Default)]
pub struct FingerprintHasher(Sha256);

impl FingerprintHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Feed more bytes into the accumulator.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the fingerprint.
    pub fn finalize(self) -> Fingerprint {
        Fingerprint(self.0.finalize().into())
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as u128 * 100) / total as u128).min(100) as u8
}

/// Fingerprint a random-access source by reading it front to back in
/// `window` byte windows.
///
/// `on_progress` receives the completed percentage after every window. It
/// never decreases and reports 100 only once the last window has been hashed.
pub fn hash_source<S, F>(source: &S, window: usize, mut on_progress: F) -> Result<Fingerprint>
where
    S: ByteSource + ?Sized,
    F: FnMut(u8),
{
    if window == 0 {
        return Err(Error::InvalidWindow(window));
    }

    let total = source.size();
    let mut hasher = FingerprintHasher::new();
    let mut offset = 0u64;

    while offset < total {
        let len = (total - offset).min(window as u64) as usize;
        let data = source.read_at(offset, len)?;
        if data.len() != len {
            return Err(Error::ShortRead {
                expected: total,
                actual: offset + data.len() as u64,
            });
        }
        hasher.update(&data);
        offset += len as u64;
        on_progress(percent_of(offset, total));
    }

    if total == 0 {
        on_progress(100);
    }

    Ok(hasher.finalize())
}

/// Fingerprint a forward-only reader in `window` byte windows.
///
/// When `total_len` is known, progress is reported after every window and a
/// reader that ends before `total_len` bytes fails with [`Error::ShortRead`].
/// Without a known length only the final 100 is reported.
pub fn hash_reader<R, F>(
    mut reader: R,
    total_len: Option<u64>,
    window: usize,
    mut on_progress: F,
) -> Result<Fingerprint>
where
    R: Read,
    F: FnMut(u8),
{
    if window == 0 {
        return Err(Error::InvalidWindow(window));
    }

    let mut hasher = FingerprintHasher::new();
    let mut buf = vec![0u8; window];
    let mut read_total = 0u64;

    loop {
        let filled = fill_window(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        hasher.update(&buf[..filled]);
        read_total += filled as u64;

        if let Some(total) = total_len {
            // Hold back 100 until the reader is exhausted.
            on_progress(percent_of(read_total, total).min(99));
        }

        if filled < window {
            break;
        }
    }

    if let Some(total) = total_len
        && read_total < total
    {
        return Err(Error::ShortRead {
            expected: total,
            actual: read_total,
        });
    }

    on_progress(100);
    Ok(hasher.finalize())
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
