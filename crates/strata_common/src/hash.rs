//! Content hashing for memoization and invalidation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

use crate::result::InternalError;

/// A 128-bit content hash computed using XXH3.
///
/// Two inputs with the same `ContentHash` are assumed to be equal by value.
/// The build engine fingerprints every memoized sub-computation's declared
/// inputs with this type and reuses the cached result when it matches.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes the content hash of a serializable value.
    ///
    /// The value is streamed through its canonical JSON encoding. Callers must
    /// only hash values whose maps are ordered (`BTreeMap`), otherwise equal
    /// values could hash differently.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, InternalError> {
        let mut hasher = ContentHasher::new();
        hasher.update(value)?;
        Ok(hasher.finish())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Incremental hasher combining several serializable inputs into one
/// [`ContentHash`].
///
/// Each input is length-delimited so that `("ab", "c")` and `("a", "bc")`
/// produce different fingerprints.
pub struct ContentHasher {
    state: xxhash_rust::xxh3::Xxh3,
}

impl ContentHasher {
    /// Creates a hasher with no inputs.
    pub fn new() -> Self {
        Self {
            state: xxhash_rust::xxh3::Xxh3::new(),
        }
    }

    /// Feeds one serializable input into the hasher.
    pub fn update<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, InternalError> {
        let mut counter = CountingWriter {
            state: &mut self.state,
            written: 0,
        };
        serde_json::to_writer(&mut counter, value)
            .map_err(|e| InternalError::new(format!("failed to fingerprint input: {e}")))?;
        let written = counter.written;
        self.state.update(&written.to_le_bytes());
        Ok(self)
    }

    /// Feeds an existing hash into the hasher.
    pub fn update_hash(&mut self, hash: ContentHash) -> &mut Self {
        self.state.update(&hash.0);
        self
    }

    /// Returns the combined hash of all inputs fed so far.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

struct CountingWriter<'a> {
    state: &'a mut xxhash_rust::xxh3::Xxh3,
    written: u64,
}

impl io::Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
