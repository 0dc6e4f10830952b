use crate::SchedulerResult;

/// 构建任务密钥的加解密提供者
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> SchedulerResult<String>;

    fn decrypt(&self, cipher: &str) -> SchedulerResult<String>;
}
