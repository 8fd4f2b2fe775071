use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const READ_CHUNK_SIZE: usize = 8192;

/// Hex-encoded SHA-1 of a file, read in chunks.
pub fn calculate_sha1(path: &Path) -> io::Result<String> {
    sha1_reader(&mut File::open(path)?)
}

/// Hex-encoded SHA-1 of everything `reader` yields.
pub fn sha1_reader(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Async wrapper around [`calculate_sha1`] that keeps hashing off the runtime threads.
pub async fn sha1_file(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || calculate_sha1(&path))
        .await
        .map_err(io::Error::other)?
}

/// Hash an already open file from its first byte, off the runtime threads.
/// Goes through the caller's handle, so it also sees files the caller holds
/// a lock on.
pub async fn sha1_handle(file: &File) -> io::Result<String> {
    let mut file = file.try_clone()?;
    tokio::task::spawn_blocking(move || {
        file.seek(SeekFrom::Start(0))?;
        sha1_reader(&mut file)
    })
    .await
    .map_err(io::Error::other)?
}

pub fn sha1_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Case-insensitive comparison of two hex digests
pub fn hashes_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected)
}
