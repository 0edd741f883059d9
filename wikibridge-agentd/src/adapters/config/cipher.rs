//! AES-256-CBC envelope for the configuration file.
//!
//! The key is compiled into the binary so files written by any installation
//! can be read by any other. That keeps the on-disk format compatible with
//! existing `config.enc` files; it obfuscates the password, it does not
//! protect it from anyone holding the binary.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const ENCRYPTION_KEY: &[u8; 32] = b"confluencewikimcpserverextension";
pub const IV_LENGTH: usize = 16;
const SEPARATOR: char = ':';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("blob is missing the iv separator")]
    MissingSeparator,
    #[error("blob is not valid hex: {0}")]
    Hex(String),
    #[error("iv must be {IV_LENGTH} bytes, got {0}")]
    IvLength(usize),
    #[error("ciphertext could not be decrypted")]
    Decrypt,
    #[error("plaintext is not valid utf-8")]
    Utf8,
}

/// Encrypts `plaintext` under a fresh random IV, returning `ivHex:cipherHex`.
pub fn encrypt(plaintext: &str) -> String {
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, &iv)
}

fn encrypt_with_iv(plaintext: &str, iv: &[u8; IV_LENGTH]) -> String {
    let ciphertext = Aes256CbcEnc::new(&(*ENCRYPTION_KEY).into(), &(*iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    format!("{}{SEPARATOR}{}", hex::encode(iv), hex::encode(ciphertext))
}

pub fn decrypt(blob: &str) -> Result<String, CipherError> {
    let (iv_hex, cipher_hex) = blob
        .trim()
        .split_once(SEPARATOR)
        .ok_or(CipherError::MissingSeparator)?;
    let iv = hex::decode(iv_hex).map_err(|err| CipherError::Hex(err.to_string()))?;
    let iv: [u8; IV_LENGTH] = iv
        .as_slice()
        .try_into()
        .map_err(|_| CipherError::IvLength(iv.len()))?;
    let ciphertext = hex::decode(cipher_hex).map_err(|err| CipherError::Hex(err.to_string()))?;
    let plaintext = Aes256CbcDec::new(&(*ENCRYPTION_KEY).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CipherError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
}
