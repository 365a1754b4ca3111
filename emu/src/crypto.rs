// SPDX-License-Identifier: MIT

//! The crypto capability: narrow, algorithm-agnostic wrappers over the raw
//! primitives, plus the portable SHA-1 midstate context required by the
//! multi-command hash ordinals.
//!
//! RSA values cross this boundary as big-endian byte arrays, left-padded to
//! the modulus length. The AES-CTR variant increments only the low four
//! bytes of the counter; this is a deliberate protocol deviation from
//! standard CTR mode and is reproduced exactly.

use aes::cipher::{
    block_padding::Pkcs7, consts::U64, generic_array::GenericArray, BlockDecryptMut, BlockEncrypt,
    BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher,
};
use aes::Aes128;
use des::TdesEde3;
use hmac::{Hmac, Mac};
use num_bigint_dig::ModInverse;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest as _, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::buffer::{Cursor, StoreBuffer};
use crate::types::{Digest, Secret, TpmRc, TpmResult, DIGEST_SIZE};

/// OAEP label of every TPM 1.2 RSA encryption.
pub const OAEP_LABEL: &str = "TCPA";

/// Default RSA public exponent when a key carries an empty exponent.
pub const RSA_DEFAULT_EXPONENT: u32 = 65537;

/// Serialization tag of the portable SHA-1 context.
const TAG_SHA1_CONTEXT_V1: u16 = 0x0001;

const SHA1_BLOCK: usize = 64;

const SHA1_INIT: [u32; 5] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0];

type HmacSha1 = Hmac<Sha1>;

/// An RSA public key in wire form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPublic {
    /// Big-endian modulus.
    pub modulus: Vec<u8>,
    /// Big-endian public exponent; empty selects the default.
    pub exponent: Vec<u8>,
}

/// An RSA private key in wire form: the public half plus one prime factor.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RsaPrivate {
    /// Big-endian modulus.
    pub modulus: Vec<u8>,
    /// Big-endian public exponent; empty selects the default.
    pub exponent: Vec<u8>,
    /// Big-endian first prime factor.
    pub prime: Vec<u8>,
}

/// Output of RSA key generation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RsaKeyMaterial {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
    pub d: Vec<u8>,
    pub p: Vec<u8>,
    pub q: Vec<u8>,
}

/// The crypto capability consumed by the core.
pub trait Crypto {
    /// `n` bytes from the RNG.
    fn rand(&self, n: usize) -> Vec<u8>;

    /// One-shot SHA-1 over the concatenation of `parts`.
    fn sha1(&self, parts: &[&[u8]]) -> Digest;

    /// HMAC-SHA1 over the concatenation of `parts`.
    fn hmac_sha1(&self, key: &[u8], parts: &[&[u8]]) -> Digest;

    /// MGF1 (SHA-1) of `out_len` bytes over the concatenated seed parts.
    fn mgf1(&self, seed_parts: &[&[u8]], out_len: usize) -> Vec<u8>;

    /// Generate an RSA key. Rejects a weak exponent and a bit width that is
    /// not a multiple of 16.
    fn rsa_gen(&self, key_bits: u32, exponent: &[u8]) -> TpmResult<RsaKeyMaterial>;

    fn rsa_pub_encrypt_oaep(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_priv_decrypt_oaep(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_pub_encrypt_pkcs1(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_priv_decrypt_pkcs1(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_pub_encrypt_raw(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_priv_decrypt_raw(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>>;

    /// PKCS#1 v1.5 signature over a SHA-1 digest.
    fn rsa_sign_sha1_pkcs1(&self, key: &RsaPrivate, digest: &Digest) -> TpmResult<Vec<u8>>;
    /// PKCS#1 v1.5 signature over caller-formatted DER.
    fn rsa_sign_der_pkcs1(&self, key: &RsaPrivate, der: &[u8]) -> TpmResult<Vec<u8>>;
    fn rsa_verify_sha1_pkcs1(&self, key: &RsaPublic, msg: &[u8], sig: &[u8]) -> bool;

    /// AES-128-CBC, zero IV, PKCS#7 padding.
    fn aes128_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;
    fn aes128_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;

    /// AES-128-CTR incrementing only the low 4 bytes of the counter.
    fn aes128_ctr_tpm(&self, key: &[u8], ctr: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;

    /// AES-128-OFB.
    fn aes128_ofb(&self, key: &[u8], iv: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;

    /// Three-key triple DES in CBC mode, zero IV, PKCS#7 padding.
    fn des_ede3_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;
    fn des_ede3_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>>;
}

/// Software implementation of [`Crypto`] over the RustCrypto stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftCrypto;

pub(crate) fn sha1_parts(parts: &[&[u8]]) -> Digest {
    let mut h = Sha1::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

pub(crate) fn mgf1_parts(seed_parts: &[&[u8]], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut counter: u32 = 0;
    while out.len() < out_len {
        let mut h = Sha1::new();
        for p in seed_parts {
            h.update(p);
        }
        h.update(counter.to_be_bytes());
        out.extend_from_slice(&h.finalize());
        counter = counter.wrapping_add(1);
    }
    out.truncate(out_len);
    out
}

fn exponent_value(exponent: &[u8]) -> BigUint {
    if exponent.is_empty() {
        BigUint::from(RSA_DEFAULT_EXPONENT)
    } else {
        BigUint::from_bytes_be(exponent)
    }
}

/// Left-pad a big-endian integer to `width` bytes.
fn pad_be(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

fn public_key(key: &RsaPublic) -> TpmResult<RsaPublicKey> {
    let n = BigUint::from_bytes_be(&key.modulus);
    let e = exponent_value(&key.exponent);
    RsaPublicKey::new(n, e).map_err(|_| TpmRc::BadParameter)
}

/// Rebuild a full private key from the modulus and one prime factor.
fn private_key(key: &RsaPrivate) -> TpmResult<RsaPrivateKey> {
    let n = BigUint::from_bytes_be(&key.modulus);
    let e = exponent_value(&key.exponent);
    let p = BigUint::from_bytes_be(&key.prime);
    let one = BigUint::from(1u8);
    let zero = BigUint::from(0u8);
    if p <= one || n.clone() % p.clone() != zero {
        return Err(TpmRc::BadParameter);
    }
    let q = n.clone() / p.clone();
    if p.clone() * q.clone() != n {
        return Err(TpmRc::BadParameter);
    }
    let phi = (p.clone() - one.clone()) * (q.clone() - one);
    let d = match e.clone().mod_inverse(&phi) {
        Some(d) => d.to_biguint().ok_or(TpmRc::BadParameter)?,
        None => return Err(TpmRc::BadParameter),
    };
    RsaPrivateKey::from_components(n, e, d, vec![p, q]).map_err(|_| TpmRc::BadParameter)
}

impl Crypto for SoftCrypto {
    fn rand(&self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        OsRng.fill_bytes(&mut out);
        out
    }

    fn sha1(&self, parts: &[&[u8]]) -> Digest {
        sha1_parts(parts)
    }

    fn hmac_sha1(&self, key: &[u8], parts: &[&[u8]]) -> Digest {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
        for p in parts {
            mac.update(p);
        }
        mac.finalize().into_bytes().into()
    }

    fn mgf1(&self, seed_parts: &[&[u8]], out_len: usize) -> Vec<u8> {
        mgf1_parts(seed_parts, out_len)
    }

    fn rsa_gen(&self, key_bits: u32, exponent: &[u8]) -> TpmResult<RsaKeyMaterial> {
        if key_bits < 512 || key_bits % 16 != 0 {
            return Err(TpmRc::BadKeyProperty);
        }
        let e = exponent_value(exponent);
        if e < BigUint::from(3u8) || e.clone() % BigUint::from(2u8) == BigUint::from(0u8) {
            return Err(TpmRc::BadKeyProperty);
        }
        let key = RsaPrivateKey::new_with_exp(&mut OsRng, key_bits as usize, &e)
            .map_err(|_| TpmRc::Fail)?;
        let primes = key.primes();
        Ok(RsaKeyMaterial {
            modulus: pad_be(&key.n().to_bytes_be(), key_bits as usize / 8),
            exponent: exponent.to_vec(),
            d: key.d().to_bytes_be(),
            p: primes[0].to_bytes_be(),
            q: primes[1].to_bytes_be(),
        })
    }

    fn rsa_pub_encrypt_oaep(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>> {
        let pk = public_key(key)?;
        pk.encrypt(&mut OsRng, Oaep::new_with_label::<Sha1, _>(OAEP_LABEL), data)
            .map_err(|_| TpmRc::EncryptError)
    }

    fn rsa_priv_decrypt_oaep(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>> {
        let sk = private_key(key)?;
        sk.decrypt(Oaep::new_with_label::<Sha1, _>(OAEP_LABEL), ct)
            .map_err(|_| TpmRc::DecryptError)
    }

    fn rsa_pub_encrypt_pkcs1(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>> {
        let pk = public_key(key)?;
        pk.encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
            .map_err(|_| TpmRc::EncryptError)
    }

    fn rsa_priv_decrypt_pkcs1(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>> {
        let sk = private_key(key)?;
        sk.decrypt(Pkcs1v15Encrypt, ct).map_err(|_| TpmRc::DecryptError)
    }

    fn rsa_pub_encrypt_raw(&self, key: &RsaPublic, data: &[u8]) -> TpmResult<Vec<u8>> {
        let n = BigUint::from_bytes_be(&key.modulus);
        let m = BigUint::from_bytes_be(data);
        if m >= n {
            return Err(TpmRc::EncryptError);
        }
        let c = m.modpow(&exponent_value(&key.exponent), &n);
        Ok(pad_be(&c.to_bytes_be(), key.modulus.len()))
    }

    fn rsa_priv_decrypt_raw(&self, key: &RsaPrivate, ct: &[u8]) -> TpmResult<Vec<u8>> {
        let sk = private_key(key)?;
        let n = BigUint::from_bytes_be(&key.modulus);
        let c = BigUint::from_bytes_be(ct);
        if c >= n {
            return Err(TpmRc::DecryptError);
        }
        let m = c.modpow(sk.d(), &n);
        Ok(pad_be(&m.to_bytes_be(), key.modulus.len()))
    }

    fn rsa_sign_sha1_pkcs1(&self, key: &RsaPrivate, digest: &Digest) -> TpmResult<Vec<u8>> {
        let sk = private_key(key)?;
        sk.sign(Pkcs1v15Sign::new::<Sha1>(), digest)
            .map_err(|_| TpmRc::EncryptError)
    }

    fn rsa_sign_der_pkcs1(&self, key: &RsaPrivate, der: &[u8]) -> TpmResult<Vec<u8>> {
        let sk = private_key(key)?;
        sk.sign(Pkcs1v15Sign::new_unprefixed(), der)
            .map_err(|_| TpmRc::EncryptError)
    }

    fn rsa_verify_sha1_pkcs1(&self, key: &RsaPublic, msg: &[u8], sig: &[u8]) -> bool {
        let Ok(pk) = public_key(key) else {
            return false;
        };
        let digest = sha1_parts(&[msg]);
        pk.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, sig).is_ok()
    }

    fn aes128_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 16 {
            return Err(TpmRc::BadParameter);
        }
        let iv = [0u8; 16];
        let enc = cbc::Encryptor::<Aes128>::new_from_slices(&key[..16], &iv)
            .map_err(|_| TpmRc::BadParameter)?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
    }

    fn aes128_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 16 {
            return Err(TpmRc::BadParameter);
        }
        let iv = [0u8; 16];
        let dec = cbc::Decryptor::<Aes128>::new_from_slices(&key[..16], &iv)
            .map_err(|_| TpmRc::BadParameter)?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| TpmRc::DecryptError)
    }

    fn aes128_ctr_tpm(&self, key: &[u8], ctr: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 16 || ctr.len() < 16 {
            return Err(TpmRc::Fail);
        }
        let cipher = Aes128::new_from_slice(&key[..16]).map_err(|_| TpmRc::Fail)?;
        let mut counter = [0u8; 16];
        counter.copy_from_slice(&ctr[..16]);
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(16) {
            let mut pad = GenericArray::clone_from_slice(&counter);
            cipher.encrypt_block(&mut pad);
            out.extend(chunk.iter().zip(pad.iter()).map(|(d, p)| d ^ p));
            // low 4 bytes only; the high 12 bytes never carry
            let low = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
            counter[12..16].copy_from_slice(&low.wrapping_add(1).to_be_bytes());
        }
        Ok(out)
    }

    fn aes128_ofb(&self, key: &[u8], iv: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 16 || iv.len() < 16 {
            return Err(TpmRc::BadParameter);
        }
        let mut buf = data.to_vec();
        let mut cipher = ofb::Ofb::<Aes128>::new_from_slices(&key[..16], &iv[..16])
            .map_err(|_| TpmRc::BadParameter)?;
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }

    fn des_ede3_cbc_encrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 24 {
            return Err(TpmRc::BadParameter);
        }
        let iv = [0u8; 8];
        let enc = cbc::Encryptor::<TdesEde3>::new_from_slices(&key[..24], &iv)
            .map_err(|_| TpmRc::BadParameter)?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(data))
    }

    fn des_ede3_cbc_decrypt(&self, key: &[u8], data: &[u8]) -> TpmResult<Vec<u8>> {
        if key.len() < 24 {
            return Err(TpmRc::BadParameter);
        }
        let iv = [0u8; 8];
        let dec = cbc::Decryptor::<TdesEde3>::new_from_slices(&key[..24], &iv)
            .map_err(|_| TpmRc::BadParameter)?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| TpmRc::DecryptError)
    }
}

/// A SHA-1 context that survives save/restore across commands.
///
/// Only the portable pieces of the block-processing state are serialized:
/// the five 32-bit chaining words, the total-bits counter, the block buffer
/// and the buffered-byte index, each big-endian.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Sha1Ctx {
    h: [u32; 5],
    total_bits: u64,
    buf: [u8; SHA1_BLOCK],
    num: usize,
}

impl Default for Sha1Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha1Ctx {
    #[must_use]
    pub fn new() -> Self {
        Sha1Ctx {
            h: SHA1_INIT,
            total_bits: 0,
            buf: [0u8; SHA1_BLOCK],
            num: 0,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total_bits = self
            .total_bits
            .wrapping_add((data.len() as u64).wrapping_mul(8));
        if self.num > 0 {
            let take = (SHA1_BLOCK - self.num).min(data.len());
            self.buf[self.num..self.num + take].copy_from_slice(&data[..take]);
            self.num += take;
            data = &data[take..];
            if self.num == SHA1_BLOCK {
                let block = GenericArray::<u8, U64>::clone_from_slice(&self.buf);
                sha1::compress(&mut self.h, &[block]);
                self.num = 0;
            }
        }
        let mut chunks = data.chunks_exact(SHA1_BLOCK);
        for chunk in chunks.by_ref() {
            let block = GenericArray::<u8, U64>::clone_from_slice(chunk);
            sha1::compress(&mut self.h, &[block]);
        }
        let rest = chunks.remainder();
        self.buf[..rest.len()].copy_from_slice(rest);
        self.num = rest.len();
    }

    #[must_use]
    pub fn finalize(mut self) -> Digest {
        let bits = self.total_bits.to_be_bytes();
        self.update(&[0x80]);
        while self.num != SHA1_BLOCK - 8 {
            self.update(&[0x00]);
        }
        self.update(&bits);
        let mut out = [0u8; DIGEST_SIZE];
        for (i, word) in self.h.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Serialize the portable state.
    pub fn save(&self, out: &mut StoreBuffer) -> TpmResult<()> {
        out.store_u16(TAG_SHA1_CONTEXT_V1)?;
        for word in &self.h {
            out.store_u32(*word)?;
        }
        out.store_u64(self.total_bits)?;
        out.store_bytes(&self.buf)?;
        out.store_u32(self.num as u32)
    }

    /// Rebuild a context from [`Sha1Ctx::save`] output.
    pub fn restore(cur: &mut Cursor) -> TpmResult<Sha1Ctx> {
        cur.load_tag(TAG_SHA1_CONTEXT_V1).map_err(|_| TpmRc::Fail)?;
        let mut h = [0u32; 5];
        for word in &mut h {
            *word = cur.load_u32()?;
        }
        let total_bits = cur.load_u64()?;
        let mut buf = [0u8; SHA1_BLOCK];
        buf.copy_from_slice(cur.load_bytes(SHA1_BLOCK)?);
        let num = cur.load_u32()? as usize;
        if num >= SHA1_BLOCK {
            return Err(TpmRc::Fail);
        }
        Ok(Sha1Ctx {
            h,
            total_bits,
            buf,
            num,
        })
    }
}

/// OAEP-encode `message` with a caller-chosen seed and pHash, with no
/// padding string: `maskedSeed(20) ∥ maskedDB` where
/// `DB = pHash ∥ 0x01 ∥ message`.
pub(crate) fn oaep_seed_encode(message: &[u8], phash: &[u8], seed: &[u8]) -> Vec<u8> {
    debug_assert_eq!(phash.len(), DIGEST_SIZE);
    debug_assert_eq!(seed.len(), DIGEST_SIZE);
    let mut db = Vec::with_capacity(DIGEST_SIZE + 1 + message.len());
    db.extend_from_slice(phash);
    db.push(0x01);
    db.extend_from_slice(message);
    let db_mask = mgf1_parts(&[seed], db.len());
    for (b, m) in db.iter_mut().zip(db_mask.iter()) {
        *b ^= m;
    }
    let seed_mask = mgf1_parts(&[&db], DIGEST_SIZE);
    let mut out = Vec::with_capacity(DIGEST_SIZE + db.len());
    out.extend(seed.iter().zip(seed_mask.iter()).map(|(s, m)| s ^ m));
    out.extend_from_slice(&db);
    out
}

/// Invert [`oaep_seed_encode`], recovering `(pHash, seed, message)`.
pub(crate) fn oaep_seed_decode(encoded: &[u8]) -> TpmResult<(Secret, [u8; DIGEST_SIZE], Vec<u8>)> {
    if encoded.len() < 2 * DIGEST_SIZE + 1 {
        return Err(TpmRc::DecryptError);
    }
    let (masked_seed, masked_db) = encoded.split_at(DIGEST_SIZE);
    let seed_mask = mgf1_parts(&[masked_db], DIGEST_SIZE);
    let mut seed = [0u8; DIGEST_SIZE];
    for (i, (s, m)) in masked_seed.iter().zip(seed_mask.iter()).enumerate() {
        seed[i] = s ^ m;
    }
    let db_mask = mgf1_parts(&[&seed], masked_db.len());
    let mut db: Vec<u8> = masked_db
        .iter()
        .zip(db_mask.iter())
        .map(|(b, m)| b ^ m)
        .collect();
    let phash = Secret::from_slice(&db[..DIGEST_SIZE]);
    let tail = &db[DIGEST_SIZE..];
    let sep = tail
        .iter()
        .position(|&b| b != 0x00)
        .ok_or(TpmRc::DecryptError)?;
    if tail[sep] != 0x01 {
        db.zeroize();
        return Err(TpmRc::DecryptError);
    }
    let message = tail[sep + 1..].to_vec();
    db.zeroize();
    Ok((phash, seed, message))
}
