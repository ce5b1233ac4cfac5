//! Cryptographic primitives for session establishment
//!
//! This module provides:
//! - Diffie-Hellman key agreement over the 1024-bit Oakley group 2 prime
//! - Session key derivation by hash chaining over the shared secret
//! - The built-in symmetric ciphers (DES and AES in ECB, CBC and CFB modes)
//! - A registry for third-party ciphers selected by id at the handshake

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{
    AsyncStreamCipher, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
};
use md5::Md5;
use num_bigint::{BigUint, RandBigInt};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

/// RFC 2409 section 6.2 prime
const DH_PRIME_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
FFFFFFFFFFFFFFFF";

const DH_GENERATOR: u32 = 2;

/// Byte length of DH public keys and shared secrets on the wire
pub const DH_KEY_LEN: usize = 128;

/// Cipher ids at or above this value name third-party ciphers
pub const EXTERNAL_CIPHER_BASE: i32 = 5000;

fn dh_prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| {
        let hex: String = DH_PRIME_HEX.chars().filter(|c| !c.is_whitespace()).collect();
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap_or_default()
    })
}

fn to_fixed_be(value: &BigUint) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0u8; DH_KEY_LEN.saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}

/// A Diffie-Hellman key pair
#[derive(Clone)]
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeyPair").finish_non_exhaustive()
    }
}

impl DhKeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let p = dh_prime();
        let mut rng = rand::thread_rng();
        let upper = p - 2u32;
        let private = rng.gen_biguint_range(&BigUint::from(2u32), &upper);
        let public = BigUint::from(DH_GENERATOR).modpow(&private, p);
        Self { private, public }
    }

    /// Public value Y, big-endian, left-padded to [`DH_KEY_LEN`]
    pub fn public_bytes(&self) -> Vec<u8> {
        to_fixed_be(&self.public)
    }

    /// Compute the shared secret from the peer's public value
    pub fn derive(&self, peer_public: &[u8]) -> Result<Vec<u8>> {
        let p = dh_prime();
        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= BigUint::from(1u32) || &peer >= p {
            return Err(Error::Protocol("invalid DH public key from server".into()));
        }
        Ok(to_fixed_be(&peer.modpow(&self.private, p)))
    }
}

// =============================================================================
// Hashes
// =============================================================================

/// Hash algorithm used for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashType {
    /// MD5 (id 1)
    #[default]
    Md5,
    /// SHA-1 (id 2)
    Sha1,
    /// SHA-256 (id 3)
    Sha256,
    /// SHA-512 (id 4)
    Sha512,
}

impl HashType {
    /// Look up by wire id; unknown ids fall back to MD5
    pub fn from_id(id: i32) -> Self {
        match id {
            2 => HashType::Sha1,
            3 => HashType::Sha256,
            4 => HashType::Sha512,
            _ => HashType::Md5,
        }
    }

    /// Wire id
    pub fn id(&self) -> i32 {
        match self {
            HashType::Md5 => 1,
            HashType::Sha1 => 2,
            HashType::Sha256 => 3,
            HashType::Sha512 => 4,
        }
    }

    /// Digest `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashType::Md5 => Md5::digest(data).to_vec(),
            HashType::Sha1 => Sha1::digest(data).to_vec(),
            HashType::Sha256 => Sha256::digest(data).to_vec(),
            HashType::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Stretch `secret` into `len` bytes: `k0 = H(secret)`, `k(i+1) = H(k(i) || secret)`
pub fn derive_key_material(secret: &[u8], hash: HashType, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 64);
    let mut block = hash.digest(secret);
    out.extend_from_slice(&block);
    while out.len() < len {
        let mut input = block.clone();
        input.extend_from_slice(secret);
        block = hash.digest(&input);
        out.extend_from_slice(&block);
    }
    out.truncate(len);
    out
}

// =============================================================================
// Symmetric Ciphers
// =============================================================================

/// A symmetric cipher applied to frame bodies and login credentials.
///
/// With `no_pad` set, block modes zero-fill to the block boundary and the
/// caller's length framing recovers the plaintext length.
pub trait Cipher: Send + Sync {
    /// Encrypt `data`
    fn encrypt(&self, data: &[u8], no_pad: bool) -> Result<Vec<u8>>;
    /// Decrypt `data`
    fn decrypt(&self, data: &[u8], no_pad: bool) -> Result<Vec<u8>>;
    /// Name for logging
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockAlgo {
    Des,
    Aes128,
    Aes192,
    Aes256,
}

impl BlockAlgo {
    fn key_len(&self) -> usize {
        match self {
            BlockAlgo::Des => 8,
            BlockAlgo::Aes128 => 16,
            BlockAlgo::Aes192 => 24,
            BlockAlgo::Aes256 => 32,
        }
    }

    fn block_len(&self) -> usize {
        match self {
            BlockAlgo::Des => 8,
            _ => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CipherMode {
    Ecb,
    Cbc,
    Cfb,
}

/// Built-in encryption types, identified by wire id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum EncryptType {
    DesEcb,
    DesCbc,
    #[default]
    DesCfb,
    Aes128Ecb,
    Aes128Cbc,
    Aes128Cfb,
    Aes192Ecb,
    Aes192Cbc,
    Aes192Cfb,
    Aes256Ecb,
    Aes256Cbc,
    Aes256Cfb,
}

impl EncryptType {
    /// Look up a built-in type by wire id
    pub fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            1 => EncryptType::DesEcb,
            2 => EncryptType::DesCbc,
            3 => EncryptType::DesCfb,
            5 => EncryptType::Aes128Ecb,
            6 => EncryptType::Aes128Cbc,
            7 => EncryptType::Aes128Cfb,
            9 => EncryptType::Aes192Ecb,
            10 => EncryptType::Aes192Cbc,
            11 => EncryptType::Aes192Cfb,
            13 => EncryptType::Aes256Ecb,
            14 => EncryptType::Aes256Cbc,
            15 => EncryptType::Aes256Cfb,
            _ => return None,
        })
    }

    /// Wire id
    pub fn id(&self) -> i32 {
        match self {
            EncryptType::DesEcb => 1,
            EncryptType::DesCbc => 2,
            EncryptType::DesCfb => 3,
            EncryptType::Aes128Ecb => 5,
            EncryptType::Aes128Cbc => 6,
            EncryptType::Aes128Cfb => 7,
            EncryptType::Aes192Ecb => 9,
            EncryptType::Aes192Cbc => 10,
            EncryptType::Aes192Cfb => 11,
            EncryptType::Aes256Ecb => 13,
            EncryptType::Aes256Cbc => 14,
            EncryptType::Aes256Cfb => 15,
        }
    }

    fn parts(&self) -> (BlockAlgo, CipherMode) {
        use EncryptType::*;
        match self {
            DesEcb => (BlockAlgo::Des, CipherMode::Ecb),
            DesCbc => (BlockAlgo::Des, CipherMode::Cbc),
            DesCfb => (BlockAlgo::Des, CipherMode::Cfb),
            Aes128Ecb => (BlockAlgo::Aes128, CipherMode::Ecb),
            Aes128Cbc => (BlockAlgo::Aes128, CipherMode::Cbc),
            Aes128Cfb => (BlockAlgo::Aes128, CipherMode::Cfb),
            Aes192Ecb => (BlockAlgo::Aes192, CipherMode::Ecb),
            Aes192Cbc => (BlockAlgo::Aes192, CipherMode::Cbc),
            Aes192Cfb => (BlockAlgo::Aes192, CipherMode::Cfb),
            Aes256Ecb => (BlockAlgo::Aes256, CipherMode::Ecb),
            Aes256Cbc => (BlockAlgo::Aes256, CipherMode::Cbc),
            Aes256Cfb => (BlockAlgo::Aes256, CipherMode::Cfb),
        }
    }
}

macro_rules! with_block_cipher {
    ($algo:expr, $C:ident => $body:expr) => {
        match $algo {
            BlockAlgo::Des => {
                type $C = des::Des;
                $body
            }
            BlockAlgo::Aes128 => {
                type $C = aes::Aes128;
                $body
            }
            BlockAlgo::Aes192 => {
                type $C = aes::Aes192;
                $body
            }
            BlockAlgo::Aes256 => {
                type $C = aes::Aes256;
                $body
            }
        }
    };
}

fn crypt_err(e: impl fmt::Display) -> Error {
    Error::Protocol(format!("cipher failure: {e}"))
}

fn ecb_encrypt<C>(key: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    ecb::Encryptor::<C>::new_from_slice(key)
        .map_err(crypt_err)?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(crypt_err)?;
    Ok(())
}

fn ecb_decrypt<C>(key: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    ecb::Decryptor::<C>::new_from_slice(key)
        .map_err(crypt_err)?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(crypt_err)?;
    Ok(())
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(crypt_err)?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(crypt_err)?;
    Ok(())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(crypt_err)?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(crypt_err)?;
    Ok(())
}

fn cfb_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(crypt_err)?
        .encrypt(buf);
    Ok(())
}

fn cfb_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(crypt_err)?
        .decrypt(buf);
    Ok(())
}

/// A built-in cipher keyed from the DH session secret
pub struct SessionCipher {
    kind: EncryptType,
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Derive key and IV from `secret` with `hash` and build the cipher
    pub fn new(kind: EncryptType, hash: HashType, secret: &[u8]) -> Self {
        let (algo, _) = kind.parts();
        let material = derive_key_material(secret, hash, algo.key_len() + algo.block_len());
        let (key, iv) = material.split_at(algo.key_len());
        Self {
            kind,
            key: key.to_vec(),
            iv: iv.to_vec(),
        }
    }

    /// Encryption type
    pub fn kind(&self) -> EncryptType {
        self.kind
    }
}

impl Cipher for SessionCipher {
    fn encrypt(&self, data: &[u8], no_pad: bool) -> Result<Vec<u8>> {
        let (algo, mode) = self.kind.parts();
        let mut buf = data.to_vec();
        if mode != CipherMode::Cfb {
            let bs = algo.block_len();
            if no_pad {
                let rem = buf.len() % bs;
                if rem != 0 {
                    buf.resize(buf.len() + bs - rem, 0);
                }
            } else {
                let pad = bs - buf.len() % bs;
                buf.extend(std::iter::repeat(pad as u8).take(pad));
            }
        }
        let (key, iv) = (&self.key[..], &self.iv[..]);
        with_block_cipher!(algo, C => match mode {
            CipherMode::Ecb => ecb_encrypt::<C>(key, &mut buf)?,
            CipherMode::Cbc => cbc_encrypt::<C>(key, iv, &mut buf)?,
            CipherMode::Cfb => cfb_encrypt::<C>(key, iv, &mut buf)?,
        });
        Ok(buf)
    }

    fn decrypt(&self, data: &[u8], no_pad: bool) -> Result<Vec<u8>> {
        let (algo, mode) = self.kind.parts();
        if mode != CipherMode::Cfb && data.len() % algo.block_len() != 0 {
            return Err(Error::Protocol(format!(
                "ciphertext length {} is not a multiple of {}",
                data.len(),
                algo.block_len()
            )));
        }
        let mut buf = data.to_vec();
        let (key, iv) = (&self.key[..], &self.iv[..]);
        with_block_cipher!(algo, C => match mode {
            CipherMode::Ecb => ecb_decrypt::<C>(key, &mut buf)?,
            CipherMode::Cbc => cbc_decrypt::<C>(key, iv, &mut buf)?,
            CipherMode::Cfb => cfb_decrypt::<C>(key, iv, &mut buf)?,
        });
        if mode != CipherMode::Cfb && !no_pad {
            let pad = buf.last().copied().unwrap_or(0) as usize;
            if pad == 0 || pad > algo.block_len() || pad > buf.len() {
                return Err(Error::Protocol("invalid cipher padding".into()));
            }
            buf.truncate(buf.len() - pad);
        }
        Ok(buf)
    }

    fn name(&self) -> &str {
        match self.kind {
            EncryptType::DesEcb => "DES_ECB",
            EncryptType::DesCbc => "DES_CBC",
            EncryptType::DesCfb => "DES_CFB",
            EncryptType::Aes128Ecb => "AES128_ECB",
            EncryptType::Aes128Cbc => "AES128_CBC",
            EncryptType::Aes128Cfb => "AES128_CFB",
            EncryptType::Aes192Ecb => "AES192_ECB",
            EncryptType::Aes192Cbc => "AES192_CBC",
            EncryptType::Aes192Cfb => "AES192_CFB",
            EncryptType::Aes256Ecb => "AES256_ECB",
            EncryptType::Aes256Cbc => "AES256_CBC",
            EncryptType::Aes256Cfb => "AES256_CFB",
        }
    }
}

// =============================================================================
// Third-party Ciphers
// =============================================================================

/// Factory building a third-party cipher from `(cipher id, session secret, hash)`
pub type ExternalCipherFactory =
    Arc<dyn Fn(i32, &[u8], HashType) -> Result<Box<dyn Cipher>> + Send + Sync>;

fn external_registry() -> &'static RwLock<HashMap<String, ExternalCipherFactory>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, ExternalCipherFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a third-party cipher provider under the `cipherPath` it answers to
pub fn register_external_cipher(path: impl Into<String>, factory: ExternalCipherFactory) {
    if let Ok(mut map) = external_registry().write() {
        map.insert(path.into(), factory);
    }
}

/// Build the cipher selected by the server at the handshake.
///
/// Ids at or above [`EXTERNAL_CIPHER_BASE`] are resolved through the
/// third-party registry using `cipher_path`.
pub fn build_cipher(
    cipher_id: i32,
    hash: HashType,
    secret: &[u8],
    cipher_path: Option<&str>,
) -> Result<Box<dyn Cipher>> {
    if cipher_id >= EXTERNAL_CIPHER_BASE {
        let path = cipher_path.ok_or_else(|| {
            Error::ThirdPartCipherInitFailed(format!("cipher {cipher_id} requires cipherPath"))
        })?;
        let factory = external_registry()
            .read()
            .ok()
            .and_then(|map| map.get(path).cloned())
            .ok_or_else(|| {
                Error::ThirdPartCipherInitFailed(format!("no cipher registered for {path}"))
            })?;
        return factory(cipher_id, secret, hash)
            .map_err(|e| Error::ThirdPartCipherInitFailed(e.to_string()));
    }
    let kind = if cipher_id <= 0 {
        EncryptType::default()
    } else {
        EncryptType::from_id(cipher_id)
            .ok_or_else(|| Error::Protocol(format!("unknown encrypt type {cipher_id}")))?
    };
    Ok(Box::new(SessionCipher::new(kind, hash, secret)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh_agreement() {
        let a = DhKeyPair::generate();
        let b = DhKeyPair::generate();
        assert_eq!(a.public_bytes().len(), DH_KEY_LEN);
        let s1 = a.derive(&b.public_bytes()).unwrap();
        let s2 = b.derive(&a.public_bytes()).unwrap();
        assert_eq!(s1, s2);
        assert!(a.derive(&[1]).is_err());
    }

    #[test]
    fn test_key_material_length() {
        let k = derive_key_material(b"secret", HashType::Md5, 40);
        assert_eq!(k.len(), 40);
        assert_eq!(&k[..16], &HashType::Md5.digest(b"secret")[..]);
    }

    #[test]
    fn test_des_cfb_default_preserves_length() {
        let c = SessionCipher::new(EncryptType::default(), HashType::Md5, &[7u8; 128]);
        let ct = c.encrypt(b"hello dm", false).unwrap();
        assert_eq!(ct.len(), 8);
        assert_ne!(&ct[..], b"hello dm");
        assert_eq!(c.decrypt(&ct, false).unwrap(), b"hello dm");
    }

    #[test]
    fn test_block_mode_padding() {
        let c = SessionCipher::new(EncryptType::Aes256Cbc, HashType::Sha256, &[3u8; 128]);
        let ct = c.encrypt(&[1u8; 16], false).unwrap();
        assert_eq!(ct.len(), 32);
        assert_eq!(c.decrypt(&ct, false).unwrap(), vec![1u8; 16]);

        let ct = c.encrypt(b"SYSDBA", true).unwrap();
        assert_eq!(ct.len(), 16);
        let pt = c.decrypt(&ct, true).unwrap();
        assert_eq!(&pt[..6], b"SYSDBA");
        assert!(pt[6..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_external_cipher_missing() {
        let err = build_cipher(EXTERNAL_CIPHER_BASE + 1, HashType::Md5, &[0; 8], Some("nope"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::ThirdPartCipherInitFailed(_)));
    }

    #[test]
    fn test_external_cipher_registry() {
        struct Xor;
        impl Cipher for Xor {
            fn encrypt(&self, data: &[u8], _: bool) -> Result<Vec<u8>> {
                Ok(data.iter().map(|b| b ^ 0x5A).collect())
            }
            fn decrypt(&self, data: &[u8], no_pad: bool) -> Result<Vec<u8>> {
                self.encrypt(data, no_pad)
            }
            fn name(&self) -> &str {
                "xor"
            }
        }
        register_external_cipher("xor-test", Arc::new(|_, _, _| Ok(Box::new(Xor) as Box<dyn Cipher>)));
        let c = build_cipher(EXTERNAL_CIPHER_BASE, HashType::Md5, &[], Some("xor-test")).unwrap();
        assert_eq!(c.name(), "xor");
        assert_eq!(c.decrypt(&c.encrypt(b"ab", false).unwrap(), false).unwrap(), b"ab");
    }
}
