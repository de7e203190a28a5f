//! Base64 conventions for keys, signatures and ciphertext.
//!
//! Olm emits unpadded standard base64; peers are not consistent about it, so
//! decoding accepts either form.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;

/// Unpadded standard alphabet on encode, padding-indifferent on decode.
pub const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
