/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementation of the vblock verifier: a strict
    keyblock -> preamble -> body chain.  Each stage must succeed before the
    next is attempted, and every rejection names the stage that failed so
    the partition scanner can keep going.

--*/

use crate::{
    FwVblockInfo, KernelVblockInfo, VerifyEnv, VerifyPolicy, KEYBLOCK_HASH_ALG, KEY_PIN_HASH_ALG,
};
use core::ops::Range;
use vaultboot_core::BootMode;
use vaultboot_error::{BootError, BootResult};
use vaultboot_image_types::{
    FwPreamble, HashAlg, Keyblock, KeyblockFlags, KernelPreamble, PackedKeyView, Signature,
    DIGEST_MAX_BYTE_SIZE, FW_PREAMBLE_BYTE_SIZE, KERNEL_PREAMBLE_BYTE_SIZE, KEYBLOCK_BYTE_SIZE,
    KEYBLOCK_HEADER_VERSION_MAJOR, KEYBLOCK_MAGIC, PREAMBLE_HEADER_VERSION_MAJOR,
};
use zerocopy::FromBytes;

/// Vblock verifier.
pub struct VblockVerifier<Env: VerifyEnv> {
    /// Verification environment
    env: Env,
}

impl<Env: VerifyEnv> VblockVerifier<Env> {
    /// Create a new instance of `VblockVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Verification environment
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Verify a firmware vblock (keyblock + firmware preamble).
    ///
    /// Firmware keyblocks are always fully signed, and their mode flags are
    /// not consulted: slot selection already consumed the mode decision.
    pub fn verify_fw_vblock<'a>(
        &mut self,
        vblock: &'a [u8],
        root_key: &PackedKeyView,
        policy: &VerifyPolicy,
    ) -> BootResult<FwVblockInfo<'a>> {
        let (kb, data_key, _) = self.verify_keyblock(vblock, root_key, true)?;
        let key_version = data_key.header.key_version();
        Self::check_key_rollback(key_version, policy)?;

        let kb_size = kb.keyblock_size();
        let pre_bytes = &vblock[kb_size as usize..];
        let (pre, body_sig, kernel_subkey) = self.verify_fw_preamble(pre_bytes, &data_key)?;

        if pre.firmware_version() > 0xFFFF {
            return Err(BootError::PREAMBLE_VERSION_RANGE);
        }
        let fw_version = key_version << 16 | pre.firmware_version();
        Self::check_combined_rollback(fw_version, policy)?;

        Ok(FwVblockInfo {
            fw_version,
            data_key,
            kernel_subkey,
            body_sig,
            body_size: pre.body_signature().data_size(),
            preamble_offset: kb_size,
            preamble_size: pre.preamble_size(),
        })
    }

    /// Verify a kernel vblock (keyblock + kernel preamble).
    pub fn verify_kernel_vblock<'a>(
        &mut self,
        vblock: &'a [u8],
        kernel_key: &PackedKeyView,
        policy: &VerifyPolicy,
    ) -> BootResult<KernelVblockInfo<'a>> {
        // Developer boots accept hash-only keyblocks unless the management
        // parameters insist on official signatures.
        let require_signature = match policy.boot_mode {
            BootMode::Developer => policy.official_only,
            _ => true,
        };
        let (kb, data_key, signed) = self.verify_keyblock(vblock, kernel_key, require_signature)?;
        Self::check_keyblock_mode_flags(kb.flags(), policy)?;
        self.check_pinned_key(&data_key, policy)?;

        let key_version = data_key.header.key_version();
        Self::check_key_rollback(key_version, policy)?;

        let kb_size = kb.keyblock_size();
        let pre_bytes = &vblock[kb_size as usize..];
        let (pre, body_sig) = self.verify_kernel_preamble(pre_bytes, &data_key)?;

        if pre.kernel_version() > 0xFFFF {
            return Err(BootError::PREAMBLE_VERSION_RANGE);
        }
        let kernel_version = key_version << 16 | pre.kernel_version();
        Self::check_combined_rollback(kernel_version, policy)?;

        Ok(KernelVblockInfo {
            kernel_version,
            signed,
            keyblock_size: kb_size,
            vblock_size: kb_size + pre.preamble_size(),
            data_key,
            body_sig,
            body_size: pre.body_signature().data_size(),
            body_load_address: pre.body_load_address(),
            bootloader_address: pre.bootloader_address(),
            bootloader_size: pre.bootloader_size(),
        })
    }

    /// Verify a payload body against the signature extracted from its
    /// verified preamble.  The caller supplies exactly the declared number
    /// of body bytes.
    pub fn verify_body(
        &mut self,
        body: &[u8],
        data_key: &PackedKeyView,
        body_sig: &[u8],
        declared_size: u32,
    ) -> BootResult<()> {
        if body.len() as u32 != declared_size {
            return Err(BootError::BODY_SIZE);
        }
        let (sig_alg, hash_alg) = data_key.header.alg()?;
        if body_sig.len() != sig_alg.signature_size() {
            return Err(BootError::BODY_SIGNATURE);
        }
        let (digest, dlen) = self.digest_buf(hash_alg, body, BootError::BODY_DIGEST)?;
        self.env
            .verify_digest(data_key, body_sig, &digest[..dlen])
            .map_err(|_| BootError::BODY_SIGNATURE)
    }

    /// Verify a keyblock and extract its data key.
    ///
    /// With `require_signature` clear (the developer path) a good signature
    /// still counts; otherwise the keyless hash authenticates the keyblock
    /// and the returned `signed` indicator is false.
    fn verify_keyblock<'a>(
        &mut self,
        vblock: &'a [u8],
        key: &PackedKeyView,
        require_signature: bool,
    ) -> BootResult<(Keyblock, PackedKeyView<'a>, bool)> {
        let kb = Keyblock::read_from_prefix(vblock).ok_or(BootError::KEYBLOCK_TOO_SMALL)?;
        if *kb.magic() != KEYBLOCK_MAGIC {
            return Err(BootError::KEYBLOCK_MAGIC);
        }
        if kb.header_version_major() != KEYBLOCK_HEADER_VERSION_MAJOR {
            return Err(BootError::KEYBLOCK_HEADER_VERSION);
        }
        let kb_size = kb.keyblock_size() as usize;
        if kb_size < KEYBLOCK_BYTE_SIZE || kb_size > vblock.len() {
            return Err(BootError::KEYBLOCK_SIZE);
        }
        let kb_bytes = &vblock[..kb_size];

        let field = Keyblock::data_key_field_offset();
        let data_key = PackedKeyView::new(&kb_bytes[field..], *kb.data_key())?;
        data_key.header.alg()?;

        let signed = if require_signature {
            self.verify_keyblock_signature(kb_bytes, &kb, key)?;
            true
        } else {
            match self.verify_keyblock_signature(kb_bytes, &kb, key) {
                Ok(()) => true,
                Err(_) => {
                    self.verify_keyblock_hash(kb_bytes, &kb)?;
                    false
                }
            }
        };

        Ok((kb, data_key, signed))
    }

    fn verify_keyblock_signature(
        &mut self,
        kb_bytes: &[u8],
        kb: &Keyblock,
        key: &PackedKeyView,
    ) -> BootResult<()> {
        let (sig_alg, hash_alg) = key.header.alg()?;
        let (data, sigr) = Self::keyblock_regions(
            kb_bytes,
            kb,
            kb.keyblock_signature(),
            sig_alg.signature_size(),
        )?;
        let (digest, dlen) =
            self.digest_buf(hash_alg, &kb_bytes[data], BootError::KEYBLOCK_SIGNATURE)?;
        self.env
            .verify_digest(key, &kb_bytes[sigr], &digest[..dlen])
            .map_err(|_| BootError::KEYBLOCK_SIGNATURE)
    }

    fn verify_keyblock_hash(&mut self, kb_bytes: &[u8], kb: &Keyblock) -> BootResult<()> {
        let (data, sigr) = Self::keyblock_regions(
            kb_bytes,
            kb,
            kb.keyblock_hash(),
            KEYBLOCK_HASH_ALG.digest_size(),
        )?;
        let (digest, dlen) =
            self.digest_buf(KEYBLOCK_HASH_ALG, &kb_bytes[data], BootError::KEYBLOCK_HASH)?;
        if kb_bytes[sigr] != digest[..dlen] {
            return Err(BootError::KEYBLOCK_HASH);
        }
        Ok(())
    }

    /// Validate the signed-data and signature-bytes regions of a keyblock
    /// signature or hash: both must sit inside the keyblock, and the signed
    /// region must cover the header and the data key.
    fn keyblock_regions(
        kb_bytes: &[u8],
        kb: &Keyblock,
        sig: &Signature,
        expected_sig_len: usize,
    ) -> BootResult<(Range<usize>, Range<usize>)> {
        let len = kb_bytes.len() as u32;
        let data = sig
            .data_range(len)
            .ok_or(BootError::KEYBLOCK_SIGNATURE_RANGE)?;
        let sigr = sig
            .sig_range(len)
            .ok_or(BootError::KEYBLOCK_SIGNATURE_RANGE)?;
        if sigr.len() != expected_sig_len {
            return Err(BootError::KEYBLOCK_SIGNATURE_RANGE);
        }
        if data.end < KEYBLOCK_BYTE_SIZE {
            return Err(BootError::KEYBLOCK_SIGNED_RANGE);
        }
        let field = Keyblock::data_key_field_offset();
        let krange = kb
            .data_key()
            .key_range(len - field as u32)
            .ok_or(BootError::CRYPTO_KEY_RANGE)?;
        if field + krange.end > data.end {
            return Err(BootError::KEYBLOCK_SIGNED_RANGE);
        }
        Ok((data, sigr))
    }

    /// Keyblock mode flags must match the current boot mode exactly.  Only
    /// kernel keyblocks are checked.
    fn check_keyblock_mode_flags(flags: KeyblockFlags, policy: &VerifyPolicy) -> BootResult<()> {
        let mut need = KeyblockFlags::MINIOS_0;
        need |= if policy.boot_mode == BootMode::Developer && !policy.official_only {
            KeyblockFlags::DEVELOPER_1
        } else {
            KeyblockFlags::DEVELOPER_0
        };
        need |= if policy.boot_mode == BootMode::ManualRecovery {
            KeyblockFlags::RECOVERY_1
        } else {
            KeyblockFlags::RECOVERY_0
        };
        if !flags.contains(need) {
            return Err(BootError::KEYBLOCK_MODE_FLAGS);
        }
        Ok(())
    }

    /// Enforce the pinned developer data key digest, when one is set.
    fn check_pinned_key(
        &mut self,
        data_key: &PackedKeyView,
        policy: &VerifyPolicy,
    ) -> BootResult<()> {
        let Some(pin) = policy.pinned_key_digest else {
            return Ok(());
        };
        let (digest, dlen) = self.digest_buf(
            KEY_PIN_HASH_ALG,
            data_key.key_data,
            BootError::KEYBLOCK_DEV_KEY_HASH,
        )?;
        if digest[..dlen] != pin[..] {
            return Err(BootError::KEYBLOCK_DEV_KEY_HASH);
        }
        Ok(())
    }

    /// Key-component rollback check.  The key version occupies the high
    /// half of the combined value.
    fn check_key_rollback(key_version: u32, policy: &VerifyPolicy) -> BootResult<()> {
        if key_version > 0xFFFF {
            return Err(BootError::KEYBLOCK_KEY_VERSION_RANGE);
        }
        if policy.disable_rollback_check {
            return Ok(());
        }
        if key_version < policy.min_version >> 16 {
            return Err(BootError::KEYBLOCK_ROLLBACK);
        }
        Ok(())
    }

    fn check_combined_rollback(combined: u32, policy: &VerifyPolicy) -> BootResult<()> {
        if policy.disable_rollback_check {
            return Ok(());
        }
        if combined < policy.min_version {
            return Err(BootError::PREAMBLE_ROLLBACK);
        }
        Ok(())
    }

    fn verify_kernel_preamble<'a>(
        &mut self,
        pre_bytes: &'a [u8],
        data_key: &PackedKeyView,
    ) -> BootResult<(KernelPreamble, &'a [u8])> {
        let pre =
            KernelPreamble::read_from_prefix(pre_bytes).ok_or(BootError::PREAMBLE_TOO_SMALL)?;
        let (data, sigr) = self.check_preamble_header(
            pre_bytes,
            pre.header_version_major(),
            pre.preamble_size(),
            pre.preamble_signature(),
            KERNEL_PREAMBLE_BYTE_SIZE,
            data_key,
        )?;
        let size = pre.preamble_size();
        self.verify_preamble_signature(pre_bytes, data, sigr, data_key)?;

        let bodyr = pre
            .body_signature()
            .sig_range(size)
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        Ok((pre, &pre_bytes[bodyr]))
    }

    fn verify_fw_preamble<'a>(
        &mut self,
        pre_bytes: &'a [u8],
        data_key: &PackedKeyView,
    ) -> BootResult<(FwPreamble, &'a [u8], PackedKeyView<'a>)> {
        let pre = FwPreamble::read_from_prefix(pre_bytes).ok_or(BootError::PREAMBLE_TOO_SMALL)?;
        let (data, sigr) = self.check_preamble_header(
            pre_bytes,
            pre.header_version_major(),
            pre.preamble_size(),
            pre.preamble_signature(),
            FW_PREAMBLE_BYTE_SIZE,
            data_key,
        )?;
        let size = pre.preamble_size();

        // The kernel subkey must be covered by the signed region.
        let field = FwPreamble::kernel_subkey_field_offset();
        let krange = pre
            .kernel_subkey()
            .key_range(size - field as u32)
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        if field + krange.end > data.end {
            return Err(BootError::PREAMBLE_SIGNATURE_RANGE);
        }

        self.verify_preamble_signature(pre_bytes, data, sigr, data_key)?;

        let kernel_subkey =
            PackedKeyView::new(&pre_bytes[field..size as usize], *pre.kernel_subkey())?;
        kernel_subkey.header.alg()?;

        let bodyr = pre
            .body_signature()
            .sig_range(size)
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        Ok((pre, &pre_bytes[bodyr], kernel_subkey))
    }

    /// Structural checks shared by both preamble kinds.
    #[allow(clippy::too_many_arguments)]
    fn check_preamble_header(
        &mut self,
        pre_bytes: &[u8],
        version_major: u32,
        preamble_size: u32,
        sig: &Signature,
        header_size: usize,
        data_key: &PackedKeyView,
    ) -> BootResult<(Range<usize>, Range<usize>)> {
        if version_major != PREAMBLE_HEADER_VERSION_MAJOR {
            return Err(BootError::PREAMBLE_HEADER_VERSION);
        }
        if (preamble_size as usize) < header_size || preamble_size as usize > pre_bytes.len() {
            return Err(BootError::PREAMBLE_SIZE);
        }
        let data = sig
            .data_range(preamble_size)
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        if data.end < header_size {
            return Err(BootError::PREAMBLE_SIGNATURE_RANGE);
        }
        let sigr = sig
            .sig_range(preamble_size)
            .ok_or(BootError::PREAMBLE_SIGNATURE_RANGE)?;
        let (sig_alg, _) = data_key.header.alg()?;
        if sigr.len() != sig_alg.signature_size() {
            return Err(BootError::PREAMBLE_SIGNATURE_RANGE);
        }
        Ok((data, sigr))
    }

    fn verify_preamble_signature(
        &mut self,
        pre_bytes: &[u8],
        data: Range<usize>,
        sigr: Range<usize>,
        data_key: &PackedKeyView,
    ) -> BootResult<()> {
        let (_, hash_alg) = data_key.header.alg()?;
        let (digest, dlen) =
            self.digest_buf(hash_alg, &pre_bytes[data], BootError::PREAMBLE_SIGNATURE)?;
        self.env
            .verify_digest(data_key, &pre_bytes[sigr], &digest[..dlen])
            .map_err(|_| BootError::PREAMBLE_SIGNATURE)
    }

    /// Run a one-shot digest through the environment, mapping any oracle
    /// failure to the stage error being computed.
    fn digest_buf(
        &mut self,
        alg: HashAlg,
        data: &[u8],
        err: BootError,
    ) -> BootResult<([u8; DIGEST_MAX_BYTE_SIZE], usize)> {
        let mut out = [0u8; DIGEST_MAX_BYTE_SIZE];
        let len = alg.digest_size();
        self.env.digest_init(alg, data.len() as u32).map_err(|_| err)?;
        self.env.digest_extend(data).map_err(|_| err)?;
        self.env.digest_finalize(&mut out[..len]).map_err(|_| err)?;
        Ok((out, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultboot_image_types::PackedKey;
    use zerocopy::AsBytes;

    const KERNEL_KEY_BYTE: u8 = 0x5A;
    const DATA_KEY_BYTE: u8 = 0xC3;
    const KEY_DATA_LEN: usize = 32;
    const SIG_LEN: usize = 256;

    const NORMAL_FLAGS: u32 = 0b010101; // DEVELOPER_0 | RECOVERY_0 | MINIOS_0
    const DEV_FLAGS: u32 = 0b010110; // DEVELOPER_1 | RECOVERY_0 | MINIOS_0
    const RECOVERY_FLAGS: u32 = 0b011001; // DEVELOPER_0 | RECOVERY_1 | MINIOS_0

    fn fake_digest(alg: HashAlg, data: &[u8]) -> Vec<u8> {
        let n = alg.digest_size();
        let seed = match alg {
            HashAlg::Sha256 => 0x11u8,
            HashAlg::Sha512 => 0x22u8,
        };
        let mut out = vec![seed; n];
        for (i, b) in data.iter().enumerate() {
            out[i % n] = out[i % n].wrapping_add(*b).rotate_left(1);
        }
        out
    }

    fn fake_sig(key: &PackedKeyView, digest: &[u8]) -> Vec<u8> {
        let (sig_alg, _) = key.header.alg().unwrap();
        let k = key.key_data[0];
        (0..sig_alg.signature_size())
            .map(|i| digest[i % digest.len()] ^ k)
            .collect()
    }

    #[derive(Default)]
    struct TestEnv {
        alg: Option<HashAlg>,
        acc: Vec<u8>,
    }

    impl VerifyEnv for TestEnv {
        fn digest_init(&mut self, alg: HashAlg, _data_size: u32) -> BootResult<()> {
            self.alg = Some(alg);
            self.acc.clear();
            Ok(())
        }

        fn digest_extend(&mut self, data: &[u8]) -> BootResult<()> {
            self.acc.extend_from_slice(data);
            Ok(())
        }

        fn digest_finalize(&mut self, digest: &mut [u8]) -> BootResult<()> {
            let d = fake_digest(self.alg.unwrap(), &self.acc);
            digest.copy_from_slice(&d[..digest.len()]);
            Ok(())
        }

        fn verify_digest(
            &mut self,
            key: &PackedKeyView,
            sig: &[u8],
            digest: &[u8],
        ) -> BootResult<()> {
            if sig == fake_sig(key, digest).as_slice() {
                Ok(())
            } else {
                Err(BootError::ENV_VERIFY)
            }
        }
    }

    fn packed_key_blob(key_byte: u8, key_version: u32) -> Vec<u8> {
        let mut header = PackedKey::default();
        header
            .set_key_offset(16)
            .set_key_size(KEY_DATA_LEN as u32)
            .set_algorithm(0)
            .set_key_version(key_version);
        let mut blob = header.as_bytes().to_vec();
        blob.extend_from_slice(&[key_byte; KEY_DATA_LEN]);
        blob
    }

    fn build_keyblock(
        flags: u32,
        data_key_version: u32,
        signing_key: &PackedKeyView,
        good_sig: bool,
    ) -> Vec<u8> {
        let key_off = KEYBLOCK_BYTE_SIZE;
        let signed_len = key_off + KEY_DATA_LEN;
        let hash_len = KEYBLOCK_HASH_ALG.digest_size();
        let total = signed_len + SIG_LEN + hash_len;

        let mut kb = Keyblock::default();
        kb.set_magic(KEYBLOCK_MAGIC)
            .set_header_version_major(KEYBLOCK_HEADER_VERSION_MAJOR)
            .set_header_version_minor(1)
            .set_keyblock_size(total as u32)
            .set_keyblock_flags(flags);

        let mut sig = Signature::default();
        sig.set_sig_offset(signed_len as u32)
            .set_sig_size(SIG_LEN as u32)
            .set_data_size(signed_len as u32);
        kb.set_keyblock_signature(sig);

        let mut hash = Signature::default();
        hash.set_sig_offset((signed_len + SIG_LEN) as u32)
            .set_sig_size(hash_len as u32)
            .set_data_size(signed_len as u32);
        kb.set_keyblock_hash(hash);

        let field = Keyblock::data_key_field_offset();
        let mut dk = PackedKey::default();
        dk.set_key_offset((key_off - field) as u32)
            .set_key_size(KEY_DATA_LEN as u32)
            .set_algorithm(0)
            .set_key_version(data_key_version);
        kb.set_data_key(dk);

        let mut buf = vec![0u8; total];
        buf[..KEYBLOCK_BYTE_SIZE].copy_from_slice(kb.as_bytes());
        buf[key_off..signed_len].copy_from_slice(&[DATA_KEY_BYTE; KEY_DATA_LEN]);

        let digest = fake_digest(HashAlg::Sha256, &buf[..signed_len]);
        let mut s = fake_sig(signing_key, &digest);
        if !good_sig {
            s[0] ^= 0xFF;
        }
        buf[signed_len..signed_len + SIG_LEN].copy_from_slice(&s);

        let h = fake_digest(KEYBLOCK_HASH_ALG, &buf[..signed_len]);
        buf[signed_len + SIG_LEN..total].copy_from_slice(&h);
        buf
    }

    fn build_kernel_preamble(
        kernel_version: u32,
        body: &[u8],
        data_key: &PackedKeyView,
    ) -> Vec<u8> {
        let header_len = KERNEL_PREAMBLE_BYTE_SIZE;
        let total = header_len + SIG_LEN + SIG_LEN;

        let mut pre = KernelPreamble::default();
        pre.set_preamble_size(total as u32)
            .set_header_version_major(PREAMBLE_HEADER_VERSION_MAJOR)
            .set_header_version_minor(1)
            .set_kernel_version(kernel_version)
            .set_body_load_address(0x10_0000)
            .set_bootloader_address(0x10_8000)
            .set_bootloader_size(0x1000);

        let mut psig = Signature::default();
        psig.set_sig_offset(header_len as u32)
            .set_sig_size(SIG_LEN as u32)
            .set_data_size(header_len as u32);
        pre.set_preamble_signature(psig);

        let mut bsig = Signature::default();
        bsig.set_sig_offset((header_len + SIG_LEN) as u32)
            .set_sig_size(SIG_LEN as u32)
            .set_data_size(body.len() as u32);
        pre.set_body_signature(bsig);

        let mut buf = vec![0u8; total];
        buf[..header_len].copy_from_slice(pre.as_bytes());

        let bd = fake_digest(HashAlg::Sha256, body);
        let bs = fake_sig(data_key, &bd);
        buf[header_len + SIG_LEN..].copy_from_slice(&bs);

        let pd = fake_digest(HashAlg::Sha256, &buf[..header_len]);
        let ps = fake_sig(data_key, &pd);
        buf[header_len..header_len + SIG_LEN].copy_from_slice(&ps);
        buf
    }

    fn build_kernel_vblock(
        flags: u32,
        data_key_version: u32,
        kernel_version: u32,
        body: &[u8],
        signing_key: &PackedKeyView,
        good_kb_sig: bool,
    ) -> Vec<u8> {
        let mut vblock = build_keyblock(flags, data_key_version, signing_key, good_kb_sig);
        let dk_blob = packed_key_blob(DATA_KEY_BYTE, data_key_version);
        let dk = PackedKeyView::from_blob(&dk_blob).unwrap();
        vblock.extend(build_kernel_preamble(kernel_version, body, &dk));
        vblock
    }

    fn kernel_key_blob() -> Vec<u8> {
        packed_key_blob(KERNEL_KEY_BYTE, 1)
    }

    #[test]
    fn test_normal_chain_passes() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let body = [0xEEu8; 128];
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &body, &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0x0002_0003);
        let info = verifier
            .verify_kernel_vblock(&vblock, &key, &policy)
            .unwrap();
        assert_eq!(info.kernel_version, 0x0002_0003);
        assert!(info.signed);
        assert_eq!(info.body_size, 128);
        assert_eq!(info.body_load_address, 0x10_0000);

        verifier
            .verify_body(&body, &info.data_key, info.body_sig, info.body_size)
            .unwrap();
    }

    #[test]
    fn test_keyblock_magic_rejected() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let mut vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, true);
        vblock[0] = b'!';

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_MAGIC)
        );
    }

    #[test]
    fn test_keyblock_size_exceeding_buffer_rejected() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        assert_eq!(
            verifier
                .verify_kernel_vblock(&vblock[..KEYBLOCK_BYTE_SIZE + 8], &key, &policy)
                .err(),
            Some(BootError::KEYBLOCK_SIZE)
        );
    }

    #[test]
    fn test_bad_signature_rejected_in_normal_mode() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, false);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_SIGNATURE)
        );
    }

    #[test]
    fn test_mode_flags_enforced() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        // A developer keyblock is rejected during a normal boot.
        let vblock = build_kernel_vblock(DEV_FLAGS, 2, 3, &[0u8; 16], &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_MODE_FLAGS)
        );
    }

    #[test]
    fn test_recovery_requires_recovery_keyblock() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let normal = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, true);
        let recovery = build_kernel_vblock(RECOVERY_FLAGS, 2, 3, &[0u8; 16], &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy {
            boot_mode: BootMode::ManualRecovery,
            min_version: 0,
            official_only: false,
            pinned_key_digest: None,
            disable_rollback_check: true,
        };
        assert_eq!(
            verifier.verify_kernel_vblock(&normal, &key, &policy).err(),
            Some(BootError::KEYBLOCK_MODE_FLAGS)
        );
        assert!(verifier
            .verify_kernel_vblock(&recovery, &key, &policy)
            .is_ok());
    }

    #[test]
    fn test_rollback_enforced_in_normal_mode() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        // Key component too old.
        let policy = VerifyPolicy::normal(0x0005_0000);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_ROLLBACK)
        );
        // Key component current, combined version too old.
        let policy = VerifyPolicy::normal(0x0002_0005);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::PREAMBLE_ROLLBACK)
        );
    }

    #[test]
    fn test_rollback_bypassed_in_developer_mode() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        // Version zero everywhere; would fail any rollback check.
        let vblock = build_kernel_vblock(DEV_FLAGS, 0, 0, &[0u8; 16], &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy {
            boot_mode: BootMode::Developer,
            min_version: 0x7FFF_0001,
            official_only: false,
            pinned_key_digest: None,
            disable_rollback_check: true,
        };
        let info = verifier
            .verify_kernel_vblock(&vblock, &key, &policy)
            .unwrap();
        assert_eq!(info.kernel_version, 0);
    }

    #[test]
    fn test_developer_mode_accepts_hash_only_keyblock() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let vblock = build_kernel_vblock(DEV_FLAGS, 2, 3, &[0u8; 16], &key, false);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy {
            boot_mode: BootMode::Developer,
            min_version: 0,
            official_only: false,
            pinned_key_digest: None,
            disable_rollback_check: true,
        };
        let info = verifier
            .verify_kernel_vblock(&vblock, &key, &policy)
            .unwrap();
        assert!(!info.signed);
    }

    #[test]
    fn test_official_only_demands_signature() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        // Officially signed keyblocks carry the developer-clear flag.
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, false);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy {
            boot_mode: BootMode::Developer,
            min_version: 0,
            official_only: true,
            pinned_key_digest: None,
            disable_rollback_check: true,
        };
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_SIGNATURE)
        );
    }

    #[test]
    fn test_pinned_key_digest() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let vblock = build_kernel_vblock(DEV_FLAGS, 2, 3, &[0u8; 16], &key, true);

        let good_pin: [u8; 32] = fake_digest(KEY_PIN_HASH_ALG, &[DATA_KEY_BYTE; KEY_DATA_LEN])
            .try_into()
            .unwrap();
        let mut policy = VerifyPolicy {
            boot_mode: BootMode::Developer,
            min_version: 0,
            official_only: false,
            pinned_key_digest: Some(good_pin),
            disable_rollback_check: true,
        };
        let mut verifier = VblockVerifier::new(TestEnv::default());
        assert!(verifier.verify_kernel_vblock(&vblock, &key, &policy).is_ok());

        policy.pinned_key_digest = Some([0u8; 32]);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::KEYBLOCK_DEV_KEY_HASH)
        );
    }

    #[test]
    fn test_preamble_signature_rejected() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let mut vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &[0u8; 16], &key, true);
        let kb_size = {
            let kb = Keyblock::read_from_prefix(vblock.as_slice()).unwrap();
            kb.keyblock_size() as usize
        };
        vblock[kb_size + KERNEL_PREAMBLE_BYTE_SIZE] ^= 0xFF;

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        assert_eq!(
            verifier.verify_kernel_vblock(&vblock, &key, &policy).err(),
            Some(BootError::PREAMBLE_SIGNATURE)
        );
    }

    #[test]
    fn test_body_verification() {
        let key_blob = kernel_key_blob();
        let key = PackedKeyView::from_blob(&key_blob).unwrap();
        let body = [0x77u8; 64];
        let vblock = build_kernel_vblock(NORMAL_FLAGS, 2, 3, &body, &key, true);

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0);
        let info = verifier
            .verify_kernel_vblock(&vblock, &key, &policy)
            .unwrap();

        // Wrong length is a distinct failure from a wrong digest.
        assert_eq!(
            verifier
                .verify_body(&body[..32], &info.data_key, info.body_sig, info.body_size)
                .err(),
            Some(BootError::BODY_SIZE)
        );
        let mut tampered = body;
        tampered[5] ^= 0x01;
        assert_eq!(
            verifier
                .verify_body(&tampered, &info.data_key, info.body_sig, info.body_size)
                .err(),
            Some(BootError::BODY_SIGNATURE)
        );
        verifier
            .verify_body(&body, &info.data_key, info.body_sig, info.body_size)
            .unwrap();
    }

    #[test]
    fn test_fw_chain_extracts_subkey() {
        let root_blob = packed_key_blob(KERNEL_KEY_BYTE, 1);
        let root = PackedKeyView::from_blob(&root_blob).unwrap();
        let body = [0x42u8; 96];

        let mut vblock = build_keyblock(NORMAL_FLAGS, 2, &root, true);
        let dk_blob = packed_key_blob(DATA_KEY_BYTE, 2);
        let dk = PackedKeyView::from_blob(&dk_blob).unwrap();
        vblock.extend(build_fw_preamble(7, &body, &dk));

        let mut verifier = VblockVerifier::new(TestEnv::default());
        let policy = VerifyPolicy::normal(0x0002_0007);
        let info = verifier.verify_fw_vblock(&vblock, &root, &policy).unwrap();
        assert_eq!(info.fw_version, 0x0002_0007);
        assert_eq!(info.body_size, 96);
        assert_eq!(info.kernel_subkey.key_data, &[0x99u8; KEY_DATA_LEN]);

        verifier
            .verify_body(&body, &info.data_key, info.body_sig, info.body_size)
            .unwrap();
    }

    fn build_fw_preamble(fw_version: u32, body: &[u8], data_key: &PackedKeyView) -> Vec<u8> {
        let header_len = FW_PREAMBLE_BYTE_SIZE;
        let field = FwPreamble::kernel_subkey_field_offset();
        let subkey_off = header_len;
        let signed_len = subkey_off + KEY_DATA_LEN;
        let total = signed_len + SIG_LEN + SIG_LEN;

        let mut pre = FwPreamble::default();
        pre.set_preamble_size(total as u32)
            .set_header_version_major(PREAMBLE_HEADER_VERSION_MAJOR)
            .set_header_version_minor(1)
            .set_firmware_version(fw_version);

        let mut psig = Signature::default();
        psig.set_sig_offset(signed_len as u32)
            .set_sig_size(SIG_LEN as u32)
            .set_data_size(signed_len as u32);
        pre.set_preamble_signature(psig);

        let mut bsig = Signature::default();
        bsig.set_sig_offset((signed_len + SIG_LEN) as u32)
            .set_sig_size(SIG_LEN as u32)
            .set_data_size(body.len() as u32);
        pre.set_body_signature(bsig);

        let mut subkey = PackedKey::default();
        subkey
            .set_key_offset((subkey_off - field) as u32)
            .set_key_size(KEY_DATA_LEN as u32)
            .set_algorithm(0)
            .set_key_version(1);
        pre.set_kernel_subkey(subkey);

        let mut buf = vec![0u8; total];
        buf[..header_len].copy_from_slice(pre.as_bytes());
        buf[subkey_off..signed_len].copy_from_slice(&[0x99u8; KEY_DATA_LEN]);

        let bd = fake_digest(HashAlg::Sha256, body);
        let bs = fake_sig(data_key, &bd);
        buf[signed_len + SIG_LEN..].copy_from_slice(&bs);

        let pd = fake_digest(HashAlg::Sha256, &buf[..signed_len]);
        let ps = fake_sig(data_key, &pd);
        buf[signed_len..signed_len + SIG_LEN].copy_from_slice(&ps);
        buf
    }
}
