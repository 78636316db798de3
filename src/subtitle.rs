use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, warn};
use url::Url;

use crate::error::SubtitleError;
use crate::types::SubtitleAsset;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const KEY_A: &[u8; 16] = b"8056483646328763";
const IV_A: &[u8; 16] = b"6852612370185273";
const KEY_B: &[u8; 16] = b"AmSmZVcH93UQUezi";
const IV_B: &[u8; 16] = b"ReBKWW8cqdjPEnF6";

/// Encryption applied to a subtitle file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleScheme {
    Plain,
    KeyA,
    KeyB,
}

impl SubtitleScheme {
    /// `None` means the extension is unknown and the asset should be skipped.
    pub fn from_src(src: &str) -> Option<Self> {
        let path = match Url::parse(src) {
            Ok(url) => url.path().to_string(),
            Err(_) => src.split(['?', '#']).next().unwrap_or(src).to_string(),
        };
        let file = path.rsplit('/').next().unwrap_or(path.as_str());
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Some(SubtitleScheme::Plain);
        };
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(SubtitleScheme::KeyA),
            "txt1" => Some(SubtitleScheme::KeyB),
            "srt" | "" => Some(SubtitleScheme::Plain),
            _ => None,
        }
    }

    fn key_iv(self) -> Option<(&'static [u8; 16], &'static [u8; 16])> {
        match self {
            SubtitleScheme::Plain => None,
            SubtitleScheme::KeyA => Some((KEY_A, IV_A)),
            SubtitleScheme::KeyB => Some((KEY_B, IV_B)),
        }
    }
}

/// Decrypts one base64 ciphertext block under `scheme`.
pub fn decrypt_block(encoded: &str, scheme: SubtitleScheme) -> Result<String, SubtitleError> {
    let Some((key, iv)) = scheme.key_iv() else {
        return Ok(encoded.to_string());
    };
    let mut buf = STANDARD.decode(encoded.trim())?;
    let plain = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|_| SubtitleError::Decrypt)?
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| SubtitleError::Decrypt)?;
    Ok(String::from_utf8(plain.to_vec())?)
}

fn is_structural_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.contains("-->")
        || trimmed.chars().all(|c| c.is_ascii_digit())
        || trimmed.eq_ignore_ascii_case("WEBVTT")
}

/// Decrypts a downloaded subtitle document.
///
/// Cue numbers, timing lines and blank lines are kept; every other line is a
/// ciphertext block. Plain documents are returned unchanged.
pub fn decrypt_document(body: &str, scheme: SubtitleScheme) -> Result<String, SubtitleError> {
    if scheme == SubtitleScheme::Plain {
        return Ok(body.to_string());
    }
    let mut out = Vec::new();
    for line in body.lines() {
        if is_structural_line(line) {
            out.push(line.trim_end().to_string());
        } else {
            out.push(decrypt_block(line, scheme)?);
        }
    }
    let mut text = out.join("\n");
    if body.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

/// Decrypts `body` fetched for `asset`.
///
/// Returns `Ok(None)` for unknown schemes, which are logged and skipped.
pub fn decrypt(asset: &SubtitleAsset, body: &str) -> Result<Option<String>, SubtitleError> {
    let Some(scheme) = SubtitleScheme::from_src(&asset.src) else {
        warn!(label = %asset.label, src = %asset.src, "unknown subtitle encryption, skipping");
        return Ok(None);
    };
    debug!(label = %asset.label, ?scheme, "decrypting subtitle");
    decrypt_document(body, scheme).map(Some)
}
