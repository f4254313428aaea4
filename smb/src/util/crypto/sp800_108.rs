use digest::Mac;

/// SP800-108 KDF in counter mode with a 32-bit counter and 32-bit length field.
pub fn derive_key<T: Mac + Clone>(mac: T, label: &[u8], context: &[u8], key_len_bits: u32) -> Vec<u8> {
    let fixed_input = [label, &[0], context, &key_len_bits.to_be_bytes()].concat();
    let key_len = key_len_bits as usize / 8;
    let mut output = Vec::with_capacity(key_len);
    let mut counter: u32 = 1;
    while output.len() < key_len {
        let block = mac.clone()
            .chain_update(counter.to_be_bytes())
            .chain_update(&fixed_input)
            .finalize()
            .into_bytes();
        let needed = (key_len - output.len()).min(block.len());
        output.extend_from_slice(&block[..needed]);
        counter += 1;
    }
    output
}

#[cfg(test)]
mod tests {
    use hmac::Hmac;
    use sha2::Sha256;

    use super::*;

    fn mac(key: &[u8]) -> Hmac<Sha256> {
        Hmac::<Sha256>::new_from_slice(key).unwrap()
    }

    #[test]
    fn output_length_follows_requested_bits() {
        assert_eq!(derive_key(mac(&[1; 16]), b"SMBSigningKey\0", &[0; 64], 128).len(), 16);
        assert_eq!(derive_key(mac(&[1; 16]), b"SMBC2SCipherKey\0", &[0; 64], 256).len(), 32);
    }

    /// A single-block derivation is HMAC(key, 1 || label || 0 || context || L).
    #[test]
    fn first_block_matches_direct_hmac() {
        let derived = derive_key(mac(&[7; 16]), b"SMB2AESCMAC\0", b"SmbSign\0", 128);
        let direct = mac(&[7; 16])
            .chain_update(1_u32.to_be_bytes())
            .chain_update(b"SMB2AESCMAC\0")
            .chain_update([0])
            .chain_update(b"SmbSign\0")
            .chain_update(128_u32.to_be_bytes())
            .finalize()
            .into_bytes();
        assert_eq!(&derived[..], &direct[..16]);
    }

    #[test]
    fn labels_separate_keys() {
        let signing = derive_key(mac(&[3; 16]), b"SMBSigningKey\0", &[9; 64], 128);
        let app = derive_key(mac(&[3; 16]), b"SMBAppKey\0", &[9; 64], 128);
        assert_ne!(signing, app);
    }
}
