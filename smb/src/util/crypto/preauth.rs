use sha2::{Digest, Sha512};

pub const PREAUTH_HASH_SIZE: usize = 64;

/// SHA-512 chain over negotiate and session setup messages (3.1.1 only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreauthHash {
    value: [u8; PREAUTH_HASH_SIZE],
}

impl PreauthHash {
    pub fn new() -> Self {
        Self { value: [0; PREAUTH_HASH_SIZE] }
    }

    /// Continues a chain from an earlier value, as a session does from its connection's.
    pub fn resume(value: &[u8]) -> Self {
        let mut hash = Self::new();
        let len = value.len().min(PREAUTH_HASH_SIZE);
        hash.value[..len].copy_from_slice(&value[..len]);
        hash
    }

    /// H(i) = SHA-512(H(i-1) || message)
    pub fn update(&mut self, message: &[u8]) {
        let digest = Sha512::new()
            .chain_update(self.value)
            .chain_update(message)
            .finalize();
        self.value.copy_from_slice(&digest);
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Default for PreauthHash {
    fn default() -> Self {
        Self::new()
    }
}
