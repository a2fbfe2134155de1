// src/archive.rs
//
// =============================================================================
// FLOWBRIDGE: ZIP UNPACKING (Coze exports)
// =============================================================================
//
// Coze ships workflow exports either as bare YAML or as a small zip archive
// holding a single descriptor. We only need "extract the one workflow
// descriptor", so this is a minimal local-file-header walk: stored and
// deflated entries, no encryption, no data descriptors, no zip64.

use crate::error::{ConvertError, Result};
use crate::platforms::Platform;
use flate2::read::DeflateDecoder;
use std::io::Read;

const LOCAL_HEADER_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const CENTRAL_DIR_MAGIC: [u8; 4] = [0x50, 0x4B, 0x01, 0x02];

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// `PK` — the two-byte signature format detection keys on.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK")
}

struct Entry {
    name: String,
    data: Vec<u8>,
}

/// Extract the single workflow descriptor from a Coze zip archive.
///
/// Prefers a `.yml`/`.yaml` entry; with exactly one file present, that file
/// wins regardless of extension.
pub fn extract_descriptor(bytes: &[u8]) -> Result<Vec<u8>> {
    let entries = walk_entries(bytes)?;

    if entries.is_empty() {
        return Err(bad("archive contains no files"));
    }

    let yaml = entries
        .iter()
        .find(|e| e.name.ends_with(".yml") || e.name.ends_with(".yaml"));

    match (yaml, entries.len()) {
        (Some(e), _) => Ok(e.data.clone()),
        (None, 1) => Ok(entries.into_iter().next().unwrap().data),
        (None, n) => Err(bad(format!(
            "archive holds {n} files and none is a YAML descriptor"
        ))),
    }
}

fn walk_entries(bytes: &[u8]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    loop {
        let Some(header) = bytes.get(pos..pos + 4) else {
            break;
        };
        if header == CENTRAL_DIR_MAGIC {
            break; // local entries exhausted
        }
        if header != LOCAL_HEADER_MAGIC {
            if entries.is_empty() {
                return Err(bad("not a zip archive (bad local header)"));
            }
            break;
        }

        let fixed = bytes
            .get(pos..pos + 30)
            .ok_or_else(|| bad("truncated local file header"))?;

        let flags = u16_at(fixed, 6);
        let method = u16_at(fixed, 8);
        let comp_size = u32_at(fixed, 18) as usize;
        let name_len = u16_at(fixed, 26) as usize;
        let extra_len = u16_at(fixed, 28) as usize;

        if flags & 0x0008 != 0 {
            return Err(bad("streamed zip entries (data descriptors) are unsupported"));
        }
        if flags & 0x0001 != 0 {
            return Err(bad("encrypted zip entries are unsupported"));
        }

        let name_start = pos + 30;
        let data_start = name_start + name_len + extra_len;
        let name_bytes = bytes
            .get(name_start..name_start + name_len)
            .ok_or_else(|| bad("truncated entry name"))?;
        let data = bytes
            .get(data_start..data_start + comp_size)
            .ok_or_else(|| bad("truncated entry data"))?;

        let name = String::from_utf8_lossy(name_bytes).into_owned();

        // Skip directory placeholders.
        if !name.ends_with('/') {
            let payload = match method {
                METHOD_STORED => data.to_vec(),
                METHOD_DEFLATE => {
                    let mut decoder = DeflateDecoder::new(data);
                    let mut out = Vec::new();
                    decoder
                        .read_to_end(&mut out)
                        .map_err(|e| bad(format!("deflate error in '{name}': {e}")))?;
                    out
                }
                other => {
                    return Err(bad(format!(
                        "unsupported compression method {other} for '{name}'"
                    )))
                }
            };
            log::debug!("📦 zip entry '{}' ({} bytes)", name, payload.len());
            entries.push(Entry { name, data: payload });
        }

        pos = data_start + comp_size;
    }

    Ok(entries)
}

fn bad(message: impl Into<String>) -> ConvertError {
    ConvertError::input(Platform::Coze, message)
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
