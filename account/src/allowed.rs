use b2_http_client::{ApiResult, Error};
use serde::{Deserialize, Serialize};

/// 应用密钥的全部权限
pub const ALL_CAPABILITIES: &[&str] = &[
    "listKeys",
    "writeKeys",
    "deleteKeys",
    "listBuckets",
    "writeBuckets",
    "deleteBuckets",
    "readBuckets",
    "listFiles",
    "readFiles",
    "shareFiles",
    "writeFiles",
    "deleteFiles",
    "readBucketEncryption",
    "writeBucketEncryption",
    "readBucketRetentions",
    "writeBucketRetentions",
    "readFileRetentions",
    "writeFileRetentions",
    "readFileLegalHolds",
    "writeFileLegalHolds",
    "readBucketReplications",
    "writeBucketReplications",
];

/// 权限描述符
///
/// 描述应用密钥可以执行的操作：权限集合，可选的存储空间限制与文件名前缀限制。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowed {
    /// 权限集合
    #[serde(rename = "capabilities")]
    pub capabilities: Vec<String>,

    /// 限制的存储空间 ID
    #[serde(rename = "bucketId")]
    pub bucket_id: Option<String>,

    /// 限制的存储空间名称
    ///
    /// 仅当服务端能解析出名称时存在，存储空间被删除后可能为空
    #[serde(rename = "bucketName")]
    pub bucket_name: Option<String>,

    /// 限制的文件名前缀
    #[serde(rename = "namePrefix")]
    pub name_prefix: Option<String>,
}

impl Allowed {
    /// 判定权限集合中是否包含指定权限
    #[inline]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|owned| owned == capability)
    }

    /// 校验权限描述符的完整性
    ///
    /// `bucket_name` 存在而 `bucket_id` 为空的描述符是非法的。
    pub fn validate(&self) -> ApiResult<()> {
        if self.bucket_name.is_some() && self.bucket_id.is_none() {
            return Err(Error::InvalidArgument {
                message: "allowed descriptor has bucket_name but no bucket_id".to_owned(),
            });
        }
        Ok(())
    }

    /// 描述密钥限制的人类可读说明
    ///
    /// 用于给未授权错误附加上下文。
    pub fn describe(&self) -> String {
        let mut messages = Vec::new();
        if self.capabilities.len() != ALL_CAPABILITIES.len()
            || !ALL_CAPABILITIES.iter().all(|cap| self.has_capability(cap))
        {
            messages.push(format!("with capabilities '{}'", self.capabilities.join(",")));
        }
        if let Some(bucket_name) = &self.bucket_name {
            messages.push(format!("restricted to bucket '{bucket_name}'"));
        }
        if let Some(name_prefix) = &self.name_prefix {
            messages.push(format!("restricted to files that start with '{name_prefix}'"));
        }
        if messages.is_empty() {
            messages.push("with no restrictions".to_owned());
        }
        messages.join(", ")
    }
}

impl Default for Allowed {
    /// 合成的全权限描述符，用于兼容缺失 `allowed` 字段的历史状态
    fn default() -> Self {
        Self {
            capabilities: ALL_CAPABILITIES.iter().map(|&capability| capability.to_owned()).collect(),
            bucket_id: None,
            bucket_name: None,
            name_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allowed_is_valid_and_unrestricted() {
        let allowed = Allowed::default();
        allowed.validate().unwrap();
        assert!(allowed.has_capability("listFiles"));
        assert_eq!(allowed.describe(), "with no restrictions");
    }

    #[test]
    fn test_allowed_with_bucket_name_but_no_id_is_rejected() {
        let allowed = Allowed {
            bucket_name: Some("bucket".to_owned()),
            ..Default::default()
        };
        assert!(allowed.validate().is_err());
    }

    #[test]
    fn test_describe_restrictions() {
        let allowed = Allowed {
            capabilities: vec!["listFiles".to_owned(), "readFiles".to_owned()],
            bucket_id: Some("bucket-id".to_owned()),
            bucket_name: Some("bucket".to_owned()),
            name_prefix: Some("photos/".to_owned()),
        };
        let description = allowed.describe();
        assert!(description.contains("with capabilities 'listFiles,readFiles'"));
        assert!(description.contains("restricted to bucket 'bucket'"));
        assert!(description.contains("restricted to files that start with 'photos/'"));
    }
}
