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

//! Cryptographic primitives used to re-authenticate a peer when a suspended connection is
//! resumed or re-established. The library doesn't implement any cipher itself.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("Key generation failed")]
    KeyGeneration,

    #[error("Invalid key")]
    InvalidKey,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,
}

/// An asymmetric key pair. The public key is sent to the peer as-is, so its encoding is
/// decided by the [`CryptoProvider`].
#[derive(Clone, Debug, PartialEq)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

pub trait CryptoProvider: Send {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    fn encrypt_with_public_key(
        &self,
        public_key: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_with_private_key(
        &self,
        key_pair: &KeyPair,
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Derives a symmetric key from a password shared by both peers.
    fn derive_secret_key(&self, password: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn encrypt(&self, secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, secret_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
