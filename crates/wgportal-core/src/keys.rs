// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Curve25519 keys in WireGuard's base64 form.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use wgportal_types::{KeyPair, PreSharedKey};
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("failed to decode base64 key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A raw 32 byte key. Used for private, public and pre-shared keys alike.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn parse(b64: &str) -> Result<Self, KeyError> {
        let bytes = BASE64.decode(b64.trim())?;
        let len = bytes.len();
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| KeyError::InvalidLength(len))
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The public key belonging to this key used as a private key.
    pub fn public_key(&self) -> Key {
        let secret = StaticSecret::from(self.0);
        Key(*PublicKey::from(&secret).as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_LEN]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = BASE64.encode(self.0);
        write!(f, "Key({}...)", &b64[..8])
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Source of fresh key material.
pub trait KeyGenerator: Send + Sync {
    fn fresh_keypair(&self) -> KeyPair;
    fn preshared_key(&self) -> PreSharedKey;
}

/// Generates keys from the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519KeyGenerator;

impl KeyGenerator for X25519KeyGenerator {
    fn fresh_keypair(&self) -> KeyPair {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair {
            private_key: BASE64.encode(secret.to_bytes()),
            public_key: BASE64.encode(public.as_bytes()),
        }
    }

    fn preshared_key(&self) -> PreSharedKey {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        PreSharedKey(BASE64.encode(bytes))
    }
}
