//! 构建任务密钥的 AES-256-GCM 加解密
//!
//! 密文格式为 `base64(nonce || ciphertext)`，nonce 固定 12 字节，每次加密随机生成。

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dispatch_core::{traits::SecretCipher, SchedulerError, SchedulerResult};
use rand::RngCore;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct AesGcmSecretCipher {
    cipher: Aes256Gcm,
}

impl AesGcmSecretCipher {
    /// 使用 Base64 编码的 32 字节主密钥
    pub fn from_base64_key(encoded: &str) -> SchedulerResult<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SchedulerError::Configuration(format!("加密密钥不是合法的Base64: {e}")))?;
        Self::from_key_bytes(&key)
    }

    pub fn from_key_bytes(key: &[u8]) -> SchedulerResult<Self> {
        if key.len() != KEY_LEN {
            return Err(SchedulerError::Configuration(format!(
                "加密密钥长度必须为{KEY_LEN}字节，实际为{}字节",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| SchedulerError::Configuration(format!("无效的加密密钥: {e}")))?;
        Ok(Self { cipher })
    }

    /// 随机生成密钥，返回 Base64 编码
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        STANDARD.encode(key)
    }
}

impl SecretCipher for AesGcmSecretCipher {
    fn encrypt(&self, plain: &str) -> SchedulerResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|_| SchedulerError::Crypto("加密失败".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, cipher: &str) -> SchedulerResult<String> {
        let bytes = STANDARD
            .decode(cipher)
            .map_err(|e| SchedulerError::Crypto(format!("密文不是合法的Base64: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(SchedulerError::Crypto("密文长度不足".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SchedulerError::Crypto("解密失败，密钥不匹配或密文已损坏".to_string()))?;

        String::from_utf8(plain).map_err(|e| SchedulerError::Crypto(format!("明文不是UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmSecretCipher {
        AesGcmSecretCipher::from_base64_key(&AesGcmSecretCipher::generate_key()).unwrap()
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = cipher();
        let encrypted = cipher.encrypt("s3cr3t").unwrap();

        assert_ne!(encrypted, "s3cr3t");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = cipher().encrypt("s3cr3t").unwrap();
        assert!(matches!(
            cipher().decrypt(&encrypted),
            Err(SchedulerError::Crypto(_))
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(AesGcmSecretCipher::from_key_bytes(&[0u8; 16]).is_err());
        assert!(AesGcmSecretCipher::from_base64_key("not base64!").is_err());
    }
}
