use std::{
    collections::HashMap,
    sync::Mutex,
};

/// 上传地址与上传令牌对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUrl {
    /// 上传地址
    pub upload_url: String,
    /// 上传令牌
    pub upload_auth_token: String,
}

impl UploadUrl {
    /// 创建上传地址与上传令牌对
    #[inline]
    pub fn new(upload_url: impl Into<String>, upload_auth_token: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            upload_auth_token: upload_auth_token.into(),
        }
    }
}

/// 上传地址池
///
/// 以存储空间 ID 或大文件 ID 为键，维护可复用的上传地址栈。
/// 取出即独占，上传成功后由调用方放回，失败则丢弃。
#[derive(Debug, Default)]
pub struct UploadUrlPool {
    pool: Mutex<HashMap<String, Vec<UploadUrl>>>,
}

impl UploadUrlPool {
    /// 创建上传地址池
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 放回一对上传地址与上传令牌
    pub fn put(&self, key: &str, upload_url: UploadUrl) {
        let mut pool = self.pool.lock().unwrap();
        pool.entry(key.to_owned()).or_default().push(upload_url);
    }

    /// 取出最近放回的一对上传地址与上传令牌
    ///
    /// 池为空时返回 [`None`]，由调用方向服务端重新申请。
    pub fn take(&self, key: &str) -> Option<UploadUrl> {
        let mut pool = self.pool.lock().unwrap();
        pool.get_mut(key).and_then(Vec::pop)
    }

    /// 丢弃指定键下的所有上传地址
    pub fn clear(&self, key: &str) {
        let mut pool = self.pool.lock().unwrap();
        pool.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_pool_is_lifo() {
        let pool = UploadUrlPool::new();
        pool.put("bucket", UploadUrl::new("url-1", "token-1"));
        pool.put("bucket", UploadUrl::new("url-2", "token-2"));
        assert_eq!(pool.take("bucket"), Some(UploadUrl::new("url-2", "token-2")));
        assert_eq!(pool.take("bucket"), Some(UploadUrl::new("url-1", "token-1")));
        assert_eq!(pool.take("bucket"), None);
    }

    #[test]
    fn test_pool_keys_are_independent() {
        let pool = UploadUrlPool::new();
        pool.put("a", UploadUrl::new("url-a", "token-a"));
        pool.put("b", UploadUrl::new("url-b", "token-b"));
        pool.clear("a");
        assert_eq!(pool.take("a"), None);
        assert_eq!(pool.take("b"), Some(UploadUrl::new("url-b", "token-b")));
    }

    #[test]
    fn test_pool_under_concurrency_never_duplicates() {
        let pool = Arc::new(UploadUrlPool::new());
        for i in 0..32 {
            pool.put("bucket", UploadUrl::new(format!("url-{i}"), format!("token-{i}")));
        }
        let handles = (0..8)
            .map(|_| {
                let pool = pool.to_owned();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(pair) = pool.take("bucket") {
                        taken.push(pair.upload_url);
                    }
                    taken
                })
            })
            .collect::<Vec<_>>();
        let mut all = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 32);
    }
}
