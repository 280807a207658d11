use aes::Aes128;
use cipher::{
    BlockDecryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;

pub const AES_128_KEY_LEN: usize = 16;
pub const AES_BLOCK_LEN: usize = 16;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    #[default]
    Pkcs7,
    None,
}

/// AES-128-CBC decrypt. The key and IV must both be exactly 16 bytes.
pub fn decrypt_cbc(
    data: &[u8],
    key: &[u8],
    iv: &[u8],
    padding: Padding,
) -> Result<Vec<u8>, DecodeError> {
    if key.len() != AES_128_KEY_LEN {
        return Err(DecodeError::KeySize {
            actual: key.len(),
            expected: AES_128_KEY_LEN,
        });
    }
    if iv.len() != AES_BLOCK_LEN {
        return Err(DecodeError::IvSize {
            actual: iv.len(),
            expected: AES_BLOCK_LEN,
        });
    }
    if data.len() % AES_BLOCK_LEN != 0 {
        return Err(DecodeError::Decrypt(format!(
            "ciphertext length {} is not a multiple of {AES_BLOCK_LEN}",
            data.len()
        )));
    }

    let mut buffer = data.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| DecodeError::Decrypt(format!("failed to initialize AES decryptor: {e}")))?;

    let decrypted_len = match padding {
        Padding::Pkcs7 => cipher.decrypt_padded_mut::<Pkcs7>(&mut buffer),
        Padding::None => cipher.decrypt_padded_mut::<NoPadding>(&mut buffer),
    }
    .map_err(|e| DecodeError::Decrypt(format!("decryption failed: {e}")))?
    .len();

    buffer.truncate(decrypted_len);
    Ok(buffer)
}

/// IV for a segment without an explicit one: its media sequence number,
/// big-endian, left-padded with zeros to 16 bytes.
pub fn sequence_iv(sequence: u64) -> [u8; AES_BLOCK_LEN] {
    let mut iv = [0u8; AES_BLOCK_LEN];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

/// Parses a hex IV as written in playlists (`0x` prefix optional).
pub fn parse_iv(iv_hex_str: &str) -> Result<[u8; AES_BLOCK_LEN], DecodeError> {
    let iv_str = iv_hex_str
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv_bytes = [0u8; AES_BLOCK_LEN];
    hex::decode_to_slice(iv_str, &mut iv_bytes)
        .map_err(|e| DecodeError::Hex(format!("failed to parse IV '{iv_hex_str}': {e}")))?;
    Ok(iv_bytes)
}

#[cfg(test)]
pub(crate) fn encrypt_cbc_pkcs7(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Vec<u8> {
    use cipher::BlockEncryptMut;

    let mut buffer = vec![0u8; plaintext.len() + AES_BLOCK_LEN];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    let len = cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .unwrap()
        .len();
    buffer.truncate(len);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38A, F.2.2 CBC-AES128.Decrypt
    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const IV: &str = "000102030405060708090a0b0c0d0e0f";
    const CIPHERTEXT: &str = "7649abac8119b246cee98e9b12e9197d\
                              5086cb9b507219ee95db113a917678b2\
                              73bed6b8e3c1743b7116e69e22229516\
                              3ff1caa1681fac09120eca307586e1a7";
    const PLAINTEXT: &str = "6bc1bee22e409f96e93d7e117393172a\
                             ae2d8a571e03ac9c9eb76fac45af8e51\
                             30c81c46a35ce411e5fbc1191a0a52ef\
                             f69f2445df4f9b17ad2b417be66c3710";

    #[test]
    fn decrypts_nist_vector() {
        let out = decrypt_cbc(
            &hex::decode(CIPHERTEXT).unwrap(),
            &hex::decode(KEY).unwrap(),
            &hex::decode(IV).unwrap(),
            Padding::None,
        )
        .unwrap();
        assert_eq!(hex::encode(out), PLAINTEXT);
    }

    #[test]
    fn wrong_key_sizes_are_structured_errors() {
        let iv = hex::decode(IV).unwrap();
        let ciphertext = hex::decode(CIPHERTEXT).unwrap();
        for len in [15usize, 17] {
            let key = vec![0u8; len];
            assert_eq!(
                decrypt_cbc(&ciphertext, &key, &iv, Padding::None),
                Err(DecodeError::KeySize {
                    actual: len,
                    expected: 16
                })
            );
        }
    }

    #[test]
    fn pkcs7_round_trip() {
        let key = [7u8; 16];
        let iv = sequence_iv(42);
        let plaintext = b"#EXTM3U\n#EXT-X-VERSION:3\n";
        let ciphertext = encrypt_cbc_pkcs7(plaintext, &key, &iv);
        assert_eq!(ciphertext.len() % 16, 0);
        assert_eq!(
            decrypt_cbc(&ciphertext, &key, &iv, Padding::Pkcs7).unwrap(),
            plaintext
        );
    }

    #[test]
    fn sequence_iv_is_big_endian() {
        let iv = sequence_iv(0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(&iv[14..], &[0x01, 0x02]);
    }

    #[test]
    fn parses_playlist_iv() {
        let iv = parse_iv("0x00000000000000000000000000000001").unwrap();
        assert_eq!(iv, sequence_iv(1));
        assert!(parse_iv("0x1234").is_err());
    }

    #[test]
    fn misaligned_ciphertext_is_rejected() {
        let res = decrypt_cbc(&[0u8; 15], &[0u8; 16], &[0u8; 16], Padding::Pkcs7);
        assert!(matches!(res, Err(DecodeError::Decrypt(_))));
    }
}
