//! Parameter cipher trait for job arguments at rest.

use crate::result::AppResult;

/// Encrypts serialized job arguments before they reach the job store and
/// decrypts them when a worker dispatches the job.
///
/// The concrete format is owned by the implementation; the worker only
/// requires that `decrypt(encrypt(x)) == x`.
pub trait ParameterCipher: Send + Sync + std::fmt::Debug + 'static {
    /// Encrypt a serialized argument list.
    fn encrypt(&self, plaintext: &str) -> AppResult<String>;

    /// Decrypt a stored argument list.
    fn decrypt(&self, ciphertext: &str) -> AppResult<String>;
}

/// Cipher that stores arguments as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl ParameterCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> AppResult<String> {
        Ok(ciphertext.to_string())
    }
}
