//! Password processing and key derivation (§4.2).

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{sha256, AesKey};
use crate::error::{MedError, Result};

/// `pbytes(pwd)`: take the last byte of each code point's UTF-8 encoding,
/// in order, then left-zero-pad to 16 bytes. Passwords are 1..16 Unicode
/// code points; anything outside that range (including the empty string)
/// is an `InvalidArgument`, not a permission failure.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PasswordBytes([u8; 16]);

impl PasswordBytes {
    pub fn derive(pwd: &str) -> Result<PasswordBytes> {
        let mut last_bytes = Vec::with_capacity(16);
        for ch in pwd.chars() {
            let mut buf = [0u8; 4];
            let encoded = ch.encode_utf8(&mut buf);
            last_bytes.push(encoded.as_bytes()[encoded.len() - 1]);
        }
        if last_bytes.is_empty() || last_bytes.len() > 16 {
            return Err(MedError::InvalidArgument(format!(
                "password must be 1..=16 code points, got {}",
                last_bytes.len()
            )));
        }
        let mut out = [0u8; 16];
        out[16 - last_bytes.len()..].copy_from_slice(&last_bytes);
        Ok(PasswordBytes(out))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// `H(x) = SHA-256(x)`, truncated to the first 16 bytes — the half actually
/// used throughout the validation-field and XOR-chain arithmetic.
fn h16(x: &[u8]) -> [u8; 16] {
    let digest = sha256(x);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// The three password-validation fields stored in a file's Universal Header
/// (§3). `level_2` and `level_3` are absent when the file was never given an
/// L2 password / recovery password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordValidationFields {
    pub level_1: [u8; 16],
    pub level_2: Option<[u8; 16]>,
    pub level_3: Option<[u8; 16]>,
}

/// The two AES-128 encryption keys derived from a password set, plus the
/// access level they represent. Never persisted; held only in memory.
pub struct DerivedKeys {
    pub access_level: u8,
    pub k1: Option<AesKey>,
    pub k2: Option<AesKey>,
}

/// Compute validation fields and derived keys when *writing* a file with a
/// fresh password set.
pub struct PasswordWriteSet<'a> {
    pub l1: &'a str,
    pub l2: Option<&'a str>,
    pub l3_recovery: Option<&'a str>,
}

impl<'a> PasswordWriteSet<'a> {
    pub fn derive(&self) -> Result<(PasswordValidationFields, DerivedKeys)> {
        let l1_bytes = PasswordBytes::derive(self.l1)?;
        let level_1 = h16(l1_bytes.as_bytes());

        let l2_bytes = self.l2.map(PasswordBytes::derive).transpose()?;
        let level_2 = l2_bytes
            .as_ref()
            .map(|l2| xor16(&h16(l2.as_bytes()), l1_bytes.as_bytes()));

        let lhi_bytes: &[u8; 16] = l2_bytes
            .as_ref()
            .map(|l2| l2.as_bytes())
            .unwrap_or_else(|| l1_bytes.as_bytes());
        let level_3 = self
            .l3_recovery
            .map(PasswordBytes::derive)
            .transpose()?
            .map(|l3| xor16(&h16(l3.as_bytes()), lhi_bytes));

        let k1 = AesKey::expand(l1_bytes.as_bytes());
        let k2 = l2_bytes.as_ref().map(|l2| AesKey::expand(l2.as_bytes()));
        let access_level = if k2.is_some() { 2 } else { 1 };

        Ok((
            PasswordValidationFields {
                level_1,
                level_2,
                level_3,
            },
            DerivedKeys {
                access_level,
                k1: Some(k1),
                k2,
            },
        ))
    }
}

/// Determine access level and derive keys for a single unspecified password
/// presented at read time (§4.2 steps 1–3).
pub fn resolve_read_access(fields: &PasswordValidationFields, candidate: &str) -> Result<DerivedKeys> {
    let p_bytes = PasswordBytes::derive(candidate)?;
    let h_p = h16(p_bytes.as_bytes());

    if h_p == fields.level_1 {
        return Ok(DerivedKeys {
            access_level: 1,
            k1: Some(AesKey::expand(p_bytes.as_bytes())),
            k2: None,
        });
    }

    if let Some(level_2) = fields.level_2 {
        let putative_l1 = xor16(&h_p, &level_2);
        if h16(&putative_l1) == fields.level_1 {
            return Ok(DerivedKeys {
                access_level: 2,
                k1: Some(AesKey::expand(&putative_l1)),
                k2: Some(AesKey::expand(p_bytes.as_bytes())),
            });
        }
    }

    Err(MedError::PermissionDenied(
        "password does not match any validation field".to_string(),
    ))
}

/// Recovered key-derivation bytes (not plaintext passwords — `pbytes` is not
/// invertible in general). Displayable to the user, never persisted (§4.2).
pub struct RecoveredPasswordBytes {
    pub l1: [u8; 16],
    pub l2: Option<[u8; 16]>,
}

/// Undo the L3 XOR chain to recover the `pbytes` of L1 (and L2, if the file
/// had one), given the L3 recovery password and the stored validation
/// fields.
pub fn recover_with_l3(
    fields: &PasswordValidationFields,
    l3_candidate: &str,
) -> Result<RecoveredPasswordBytes> {
    let level_3 = fields
        .level_3
        .ok_or_else(|| MedError::InvalidArgument("file has no L3 recovery field".to_string()))?;
    let l3_bytes = PasswordBytes::derive(l3_candidate)?;
    let recovered_lhi = xor16(&h16(l3_bytes.as_bytes()), &level_3);

    match fields.level_2 {
        Some(level_2) => {
            let recovered_l1 = xor16(&h16(&recovered_lhi), &level_2);
            Ok(RecoveredPasswordBytes {
                l1: recovered_l1,
                l2: Some(recovered_lhi),
            })
        }
        None => Ok(RecoveredPasswordBytes {
            l1: recovered_lhi,
            l2: None,
        }),
    }
}
