#![deny(missing_docs)]

//! Utility functions for computing package hashes using the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) family of crates.
//!
//! Conda packages are identified by an MD5 and/or SHA256 hash of their archive
//! and individual installed files carry a SHA256 hash of their shipped
//! content. This crate bundles the few operations the rest of the workspace
//! needs: digesting files and byte streams, parsing hex digests, and wrapping
//! readers/writers so content is hashed while it is being moved around.

#[cfg(feature = "serde")]
pub mod serde;

pub use digest;
use digest::{Digest, Output};
pub use md5::Md5;
pub use sha2::Sha256;
use std::io::{Read, Write};
use std::{fs::File, path::Path};

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// A type alias for the output of an MD5 hash.
pub type Md5Hash = md5::digest::Output<Md5>;

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: Digest + Default + Write>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hash hex string to a digest. Returns `None` if the string is not
/// a valid hex representation of the digest size.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = <Output<D>>::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// A simple object that provides a [`Write`] implementation that also
/// immediately hashes the bytes written to it. Call
/// [`HashingWriter::finalize`] to retrieve both the original `impl Write`
/// object as well as the hash.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Default::default(),
        }
    }
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Consumes this instance and returns the original writer and the hash of
    /// all bytes written to this instance.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A simple object that provides a [`Read`] implementation that also
/// immediately hashes the bytes read from it. Call
/// [`HashingReader::finalize`] to retrieve both the original `impl Read`
/// object as well as the hash.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest + Default> HashingReader<R, D> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: Default::default(),
        }
    }
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Consumes this instance and returns the original reader and the hash of
    /// all bytes read from this instance.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::{compute_bytes_digest, parse_digest_from_hex, HashingReader, HashingWriter};
    use hex_literal::hex;
    use std::io::{Cursor, Read, Write};

    #[test]
    fn test_compute_bytes_digest() {
        let digest = compute_bytes_digest::<sha2::Sha256>("Hello, world!");
        assert_eq!(
            digest[..],
            hex!("315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3")[..]
        );
    }

    #[test]
    fn test_parse_digest_from_hex() {
        let digest = parse_digest_from_hex::<sha2::Sha256>(
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3",
        )
        .unwrap();
        assert_eq!(digest, compute_bytes_digest::<sha2::Sha256>("Hello, world!"));

        assert!(parse_digest_from_hex::<sha2::Sha256>("deadbeef").is_none());
        assert!(parse_digest_from_hex::<sha2::Sha256>("not-hex").is_none());
    }

    #[test]
    fn test_hashing_writer() {
        let mut writer = HashingWriter::<_, sha2::Sha256>::new(Vec::new());
        writer.write_all(b"Hello, ").unwrap();
        writer.write_all(b"world!").unwrap();
        let (bytes, hash) = writer.finalize();
        assert_eq!(bytes, b"Hello, world!");
        assert_eq!(hash, compute_bytes_digest::<sha2::Sha256>("Hello, world!"));
    }

    #[test]
    fn test_hashing_reader() {
        let mut reader = HashingReader::<_, sha2::Sha256>::new(Cursor::new(b"Hello, world!"));
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        let (_, hash) = reader.finalize();
        assert_eq!(content, "Hello, world!");
        assert_eq!(hash, compute_bytes_digest::<sha2::Sha256>("Hello, world!"));
    }
}
