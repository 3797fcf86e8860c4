//! Release, asset and archive fixtures.

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

use crate::models::{Asset, DigestHint, Release};

/// An asset without size or digest.
pub fn asset(name: &str, url: impl Into<String>) -> Asset {
    Asset {
        name: name.to_string(),
        url: url.into(),
        size: None,
        digest: None,
    }
}

/// A stable release whose assets are served as `<base_url>/<name>`.
pub fn release(tag: &str, names: &[&str], base_url: &str) -> Release {
    let base_url = base_url.trim_end_matches('/');
    Release {
        tag: tag.to_string(),
        published_at: None,
        prerelease: false,
        assets: names.iter().map(|name| asset(name, format!("{base_url}/{name}"))).collect(),
    }
}

/// `release` flagged as a prerelease.
pub fn prerelease(tag: &str, names: &[&str], base_url: &str) -> Release {
    Release {
        prerelease: true,
        ..release(tag, names, base_url)
    }
}

/// Attach an inline SHA-256 digest of `content` to `asset`.
pub fn with_inline_digest(mut asset: Asset, content: &[u8]) -> Asset {
    asset.digest = Some(DigestHint::Inline {
        algorithm: Some("sha256".to_string()),
        hex: sha256_hex(content),
    });
    asset
}

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// A zip archive holding `files` as `(path, content)` pairs.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (path, content) in files {
        writer.start_file(*path, options).expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// A gzip-compressed tar archive holding `files` as `(path, content)` pairs.
pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).expect("append tar entry");
    }
    builder.into_inner().expect("finish tar").finish().expect("finish gzip")
}
