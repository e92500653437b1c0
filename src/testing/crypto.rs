// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::crypto::CryptoError;
use crate::api::crypto::CryptoProvider;
use crate::api::crypto::KeyPair;
use sha2::Digest;
use sha2::Sha256;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

/// A deterministic, insecure, cipher for tests. Data is XORed with the key and prefixed with a
/// checksum, so that decrypting with the wrong key fails.
#[derive(Default)]
pub struct MockCrypto {
    next_key: AtomicU8,
}

impl MockCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    fn xor(key: &[u8], data: &[u8]) -> Vec<u8> {
        data.iter().zip(key.iter().cycle()).map(|(d, k)| d ^ k).collect()
    }

    fn checksum(data: &[u8]) -> [u8; 4] {
        let digest = Sha256::digest(data);
        [digest[0], digest[1], digest[2], digest[3]]
    }

    fn seal(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::InvalidKey);
        }
        let mut out = Self::checksum(data).to_vec();
        out.extend(Self::xor(key, data));
        Ok(out)
    }

    fn open(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < 4 {
            return Err(CryptoError::Decrypt);
        }
        let (sum, body) = data.split_at(4);
        if key.is_empty() {
            return Err(CryptoError::InvalidKey);
        }
        let plain = Self::xor(key, body);
        if Self::checksum(&plain)[..] != *sum {
            return Err(CryptoError::Decrypt);
        }
        Ok(plain)
    }
}

impl CryptoProvider for MockCrypto {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let seed = self.next_key.fetch_add(1, Ordering::Relaxed);
        let key: Vec<u8> = (0..16).map(|i| seed.wrapping_mul(31).wrapping_add(i * 7 + 1)).collect();
        Ok(KeyPair { public_key: key.clone(), private_key: key })
    }

    fn encrypt_with_public_key(
        &self,
        public_key: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::seal(public_key, data)
    }

    fn decrypt_with_private_key(
        &self,
        key_pair: &KeyPair,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::open(&key_pair.private_key, data)
    }

    fn derive_secret_key(&self, password: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Sha256::digest(password).to_vec())
    }

    fn encrypt(&self, secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::seal(secret_key, data)
    }

    fn decrypt(&self, secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::open(secret_key, data)
    }
}
