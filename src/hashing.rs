//! Computes the three checksums (§4.8) we're contractually obligated to
//! store on every blob, in a single streaming pass.

use std::io;
use std::io::prelude::*;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

/// The three digests of a blob's bytes, raw (not hex) as stored in xattrs
/// (§3: `checksum.sha1`, `checksum.md5`, `checksum.adler32`).
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Checksums {
    pub sha1: [u8; 20],
    #[serde(with = "serde_bytes")]
    pub md5: Vec<u8>,
    pub adler32: u32,
}

impl Checksums {
    /// Parses a `"<algo> <hex>"` header (§4.8 step 3) and returns the bytes
    /// to compare against the matching field, or `None` for an unrecognized
    /// algorithm.
    pub fn parse_client_checksum(header: &str) -> Option<(ChecksumAlgorithm, Vec<u8>)> {
        let (algo, hex) = header.split_once(' ')?;
        let algo = match algo {
            "sha1" => ChecksumAlgorithm::Sha1,
            "md5" => ChecksumAlgorithm::Md5,
            "adler32" => ChecksumAlgorithm::Adler32,
            _ => return None,
        };
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.to_ascii_lowercase().as_bytes())
            .ok()?;
        Some((algo, bytes))
    }

    /// Compares the given algorithm's field against `expected` bytes.
    pub fn matches(&self, algo: ChecksumAlgorithm, expected: &[u8]) -> bool {
        match algo {
            ChecksumAlgorithm::Sha1 => self.sha1.as_slice() == expected,
            ChecksumAlgorithm::Md5 => self.md5.as_slice() == expected,
            ChecksumAlgorithm::Adler32 => self.adler32.to_be_bytes().as_slice() == expected,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Md5,
    Adler32,
}

/// A reader that tees everything it reads through SHA1, MD5, and Adler-32
/// hashers, so a single copy (e.g. into the blob store) yields all three
/// digests at once instead of three separate passes over the bytes.
pub struct HashingReader<R> {
    inner: R,
    sha1: Sha1,
    md5: Md5,
    adler32: adler32::RollingAdler32,
    len: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            sha1: Sha1::new(),
            md5: Md5::new(),
            adler32: adler32::RollingAdler32::new(),
            len: 0,
        }
    }

    /// Consumes the reader, returning the computed checksums, the total
    /// byte count copied, and the inner reader.
    pub fn finalize(self) -> (Checksums, u64, R) {
        let sha1 = self.sha1.finalize();
        let md5 = self.md5.finalize();
        let checksums = Checksums {
            sha1: sha1.into(),
            md5: md5.to_vec(),
            adler32: self.adler32.hash(),
        };
        (checksums, self.len, self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        let filled = &buf[..count];
        self.sha1.update(filled);
        self.md5.update(filled);
        self.adler32.update_buffer(filled);
        self.len += count as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HELLO: &[u8] = b"hello";

    #[test]
    fn hashes_match_known_vectors() {
        let mut r = HashingReader::new(HELLO);
        let mut sink = Vec::new();
        io::copy(&mut r, &mut sink).unwrap();
        let (checksums, len, _) = r.finalize();

        assert_eq!(len, 5);
        assert_eq!(
            checksums.sha1,
            hex_literal::hex!("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
        );
        assert_eq!(
            checksums.md5,
            hex_literal::hex!("5d41402abc4b2a76b9719d911017c592")
        );
    }

    #[test]
    fn parses_client_checksum_header() {
        let (algo, bytes) =
            Checksums::parse_client_checksum("sha1 aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
                .unwrap();
        assert_eq!(algo, ChecksumAlgorithm::Sha1);
        assert_eq!(bytes.len(), 20);

        assert!(Checksums::parse_client_checksum("crc64 deadbeef").is_none());
    }
}
