//! Detach key handling for interactive sessions.
//!
//! Detaching is a client-side decision: the key sequence is recognized in
//! local input before it reaches the remote side, and the session is then
//! closed locally while the container keeps running.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Detach sequence used when none is configured.
pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";

const INPUT_CHUNK_SIZE: usize = 4096;

/// A detach key specification could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid detach key {key:?}: {reason}")]
pub struct InvalidDetachKeys {
    /// The offending key.
    pub key: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// A parsed detach key sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachKeys {
    spec: String,
    bytes: Vec<u8>,
}

impl DetachKeys {
    /// The raw bytes of the sequence.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The sequence as written in config, e.g. `ctrl-p,ctrl-q`.
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl Default for DetachKeys {
    fn default() -> Self {
        Self {
            spec: DEFAULT_DETACH_KEYS.to_string(),
            bytes: vec![0x10, 0x11],
        }
    }
}

fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' => Some(0),
        '[' => Some(27),
        '\\' => Some(28),
        ']' => Some(29),
        '^' => Some(30),
        '_' => Some(31),
        _ => None,
    }
}

fn parse_key(key: &str) -> Result<u8, InvalidDetachKeys> {
    let invalid = |reason| InvalidDetachKeys {
        key: key.to_string(),
        reason,
    };

    if let Some(rest) = key.strip_prefix("ctrl-") {
        let mut chars = rest.chars();
        return match (chars.next(), chars.next()) {
            (Some(c), None) => control_byte(c).ok_or_else(|| invalid("unknown control character")),
            _ => Err(invalid("expected a single character after ctrl-")),
        };
    }

    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() && !c.is_ascii_control() => Ok(c as u8),
        (Some(_), None) => Err(invalid("only printable ASCII characters are allowed")),
        (None, _) => Err(invalid("empty key")),
        _ => Err(invalid("expected ctrl-<char> or a single character")),
    }
}

impl FromStr for DetachKeys {
    type Err = InvalidDetachKeys;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s
            .split(',')
            .map(|key| parse_key(key.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            spec: s.to_string(),
            bytes,
        })
    }
}

impl fmt::Display for DetachKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

/// Scans input for the detach sequence.
///
/// Bytes that could be the start of the sequence are held back until the
/// sequence either completes or is broken, so a full sequence is never
/// forwarded.
#[derive(Debug)]
pub struct DetachDetector {
    keys: Vec<u8>,
    /// `fallback[i]`: length of the longest proper prefix of `keys[..=i]`
    /// that is also its suffix.
    fallback: Vec<usize>,
    matched: usize,
}

fn fallback_table(keys: &[u8]) -> Vec<usize> {
    let mut table = vec![0; keys.len()];
    let mut len = 0;
    for i in 1..keys.len() {
        while len > 0 && keys[i] != keys[len] {
            len = table[len - 1];
        }
        if keys[i] == keys[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

/// Result of feeding input to a [`DetachDetector`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scan {
    /// Bytes safe to forward.
    pub forward: Vec<u8>,
    /// Whether the full sequence was seen. Input after it is dropped.
    pub detached: bool,
}

impl DetachDetector {
    /// Create a detector for `keys`.
    pub fn new(keys: &DetachKeys) -> Self {
        Self {
            keys: keys.as_bytes().to_vec(),
            fallback: fallback_table(keys.as_bytes()),
            matched: 0,
        }
    }

    /// Feed a chunk of input.
    pub fn scan(&mut self, input: &[u8]) -> Scan {
        let mut scan = Scan::default();
        if self.keys.is_empty() {
            scan.forward.extend_from_slice(input);
            return scan;
        }

        for &byte in input {
            // On a mismatch fall back to the longest held suffix that is
            // still a prefix of the sequence, releasing the bytes before it.
            while self.matched > 0 && byte != self.keys[self.matched] {
                let fallback = self.fallback[self.matched - 1];
                scan.forward.extend_from_slice(&self.keys[..self.matched - fallback]);
                self.matched = fallback;
            }

            if byte != self.keys[self.matched] {
                scan.forward.push(byte);
                continue;
            }

            self.matched += 1;
            if self.matched == self.keys.len() {
                self.matched = 0;
                scan.detached = true;
                return scan;
            }
        }

        scan
    }

    /// Bytes currently held back as a possible prefix.
    pub fn pending(&self) -> &[u8] {
        &self.keys[..self.matched]
    }
}

/// How [`forward_input`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// The detach sequence was typed.
    Detached,
    /// Input reached end of file and stdin was closed on the remote side.
    Eof,
}

/// Copy `input` into `output`, stopping at the detach sequence.
///
/// On end of input any held-back bytes are flushed and `output` is shut
/// down, which half-closes a hijacked connection. On detach nothing is shut
/// down; the caller closes the session.
pub async fn forward_input<R, W>(
    input: &mut R,
    output: &mut W,
    keys: &DetachKeys,
) -> std::io::Result<InputOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut detector = DetachDetector::new(keys);
    let mut buf = vec![0u8; INPUT_CHUNK_SIZE];

    loop {
        let read = input.read(&mut buf).await?;
        if read == 0 {
            let pending = detector.pending().to_vec();
            if !pending.is_empty() {
                output.write_all(&pending).await?;
            }
            output.shutdown().await?;
            return Ok(InputOutcome::Eof);
        }

        let scan = detector.scan(&buf[..read]);
        if !scan.forward.is_empty() {
            output.write_all(&scan.forward).await?;
            output.flush().await?;
        }
        if scan.detached {
            tracing::debug!(keys = %keys, "Detach sequence received");
            return Ok(InputOutcome::Detached);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(spec: &str) -> DetachKeys {
        spec.parse().unwrap()
    }

    #[test]
    fn test_parse_default_keys() {
        let parsed = keys(DEFAULT_DETACH_KEYS);
        assert_eq!(parsed.as_bytes(), &[0x10, 0x11]);
        assert_eq!(parsed, DetachKeys::default());
        assert_eq!(parsed.to_string(), "ctrl-p,ctrl-q");
    }

    #[test]
    fn test_parse_control_symbols() {
        let parsed = keys("ctrl-@,ctrl-[,ctrl-\\,ctrl-],ctrl-^,ctrl-_,ctrl-a,ctrl-z");
        assert_eq!(parsed.as_bytes(), &[0, 27, 28, 29, 30, 31, 1, 26]);
    }

    #[test]
    fn test_parse_plain_characters() {
        assert_eq!(keys("ctrl-a,d").as_bytes(), &[0x01, b'd']);
        assert_eq!(keys("q").as_bytes(), b"q");
    }

    #[test]
    fn test_parse_invalid_keys() {
        for bad in ["", "ctrl-", "ctrl-1", "ctrl-ab", "ab", "ctrl-p,", "é"] {
            assert!(bad.parse::<DetachKeys>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_scan_passes_plain_input() {
        let mut detector = DetachDetector::new(&DetachKeys::default());
        let scan = detector.scan(b"ls -la\n");
        assert_eq!(scan.forward, b"ls -la\n");
        assert!(!scan.detached);
    }

    #[test]
    fn test_scan_detects_sequence_across_chunks() {
        let mut detector = DetachDetector::new(&DetachKeys::default());

        let first = detector.scan(b"abc\x10");
        assert_eq!(first.forward, b"abc");
        assert_eq!(detector.pending(), &[0x10]);

        let second = detector.scan(b"\x11trailing");
        assert!(second.detached);
        assert!(second.forward.is_empty());
    }

    #[test]
    fn test_scan_releases_broken_prefix() {
        let mut detector = DetachDetector::new(&DetachKeys::default());
        let scan = detector.scan(b"\x10x");
        assert_eq!(scan.forward, b"\x10x");
        assert!(!scan.detached);
        assert!(detector.pending().is_empty());
    }

    #[test]
    fn test_scan_restarts_on_repeated_first_key() {
        let mut detector = DetachDetector::new(&DetachKeys::default());
        let scan = detector.scan(b"\x10\x10\x11");
        assert_eq!(scan.forward, b"\x10");
        assert!(scan.detached);
    }

    #[test]
    fn test_scan_self_overlapping_sequence() {
        let mut detector = DetachDetector::new(&keys("ctrl-p,ctrl-p,ctrl-q"));
        let scan = detector.scan(b"\x10\x10\x10\x11");
        assert_eq!(scan.forward, b"\x10");
        assert!(scan.detached);

        let mut detector = DetachDetector::new(&keys("ctrl-p,ctrl-p,ctrl-q"));
        let first = detector.scan(b"\x10\x10\x10");
        assert_eq!(first.forward, b"\x10");
        assert_eq!(detector.pending(), b"\x10\x10");
        assert!(detector.scan(b"\x11").detached);
    }

    #[test]
    fn test_scan_falls_back_to_inner_prefix() {
        let mut detector = DetachDetector::new(&keys("a,b,a,c"));
        let scan = detector.scan(b"xababac");
        assert_eq!(scan.forward, b"xab");
        assert!(scan.detached);
    }

    #[tokio::test]
    async fn test_forward_input_until_eof() {
        let mut input: &[u8] = b"echo hi\n\x10";
        let (mut local, mut remote) = tokio::io::duplex(1024);

        let outcome = forward_input(&mut input, &mut local, &DetachKeys::default())
            .await
            .unwrap();
        assert_eq!(outcome, InputOutcome::Eof);

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"echo hi\n\x10");
    }

    #[tokio::test]
    async fn test_forward_input_detaches() {
        let mut input: &[u8] = b"top\n\x10\x11exit\n";
        let (mut local, mut remote) = tokio::io::duplex(1024);

        let outcome = forward_input(&mut input, &mut local, &DetachKeys::default())
            .await
            .unwrap();
        assert_eq!(outcome, InputOutcome::Detached);
        drop(local);

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"top\n");
    }
}
