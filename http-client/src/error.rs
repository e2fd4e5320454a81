use b2_http::{header::RETRY_AFTER, HeaderMap, ResponseError as HttpResponseError, ResponseErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error as ThisError;

static UPLOAD_TOKEN_USED_CONCURRENTLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^more than one upload using auth token (?P<token>.+)$").unwrap());

/// B2 API 错误
///
/// 覆盖传输失败，协议失败，服务端业务错误，校验失败以及聚合错误。
/// 每种错误通过 [`Error::should_retry_http`] 与 [`Error::should_retry_upload`]
/// 标明是否可以整体重试，以及是否需要更换上传地址后重试。
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum Error {
    /// 传输层错误
    #[error("Connection error: {0}")]
    Connection(#[from] HttpResponseError),

    /// 服务端返回了无法解析的 JSON
    #[error("Invalid json response: {content}")]
    InvalidJsonResponse {
        /// 响应内容摘录
        content: String,
    },

    /// 把 S3 endpoint 误作 realm 传入
    #[error("Potential S3 endpoint passed as realm: {url}")]
    PotentialS3EndpointPassedAsRealm {
        /// 发生错误的 URL
        url: String,
    },

    /// 服务端时间与本地时间相差过大
    #[error("Clock skew between server and local is {skew_seconds} seconds")]
    ClockSkew {
        /// 偏差秒数
        skew_seconds: i64,
    },

    /// 服务端 Date 响应头无法解析
    #[error("Bad date format: {date}")]
    BadDateFormat {
        /// 原始 Date 响应头
        date: String,
    },

    /// 请求体 JSON 非法
    #[error("Bad request: {message}")]
    BadJson {
        /// 服务端给出的原因
        message: String,
    },

    /// 请求参数非法
    #[error("Bad request: {message}")]
    BadRequest {
        /// 服务端给出的原因
        message: String,
        /// 服务端错误码
        code: String,
    },

    /// 文件已经被隐藏
    #[error("File already hidden: {file_name}")]
    FileAlreadyHidden {
        /// 文件名
        file_name: String,
    },

    /// 文件不存在
    #[error("File not present: {file_id_or_name}")]
    FileNotPresent {
        /// 文件 ID 或文件名
        file_id_or_name: String,
    },

    /// 资源不存在
    #[error("No such file, bucket, or endpoint")]
    ResourceNotFound,

    /// 存储空间名称已被占用
    #[error("Bucket name is already in use: {bucket_name}")]
    DuplicateBucketName {
        /// 存储空间名称
        bucket_name: String,
    },

    /// 分片缺失
    #[error("Part number has not been uploaded: {file_id}")]
    MissingPart {
        /// 大文件 ID
        file_id: String,
    },

    /// 分片 SHA-1 不匹配
    #[error("Part number {file_id} has wrong SHA1")]
    PartSha1Mismatch {
        /// 大文件 ID
        file_id: String,
    },

    /// 存储空间 ID 不存在
    #[error("Bucket with id={bucket_id} not found")]
    BucketIdNotFound {
        /// 存储空间 ID
        bucket_id: String,
    },

    /// 上传令牌被并发使用
    #[error("More than one concurrent upload using auth token {token}")]
    UploadTokenUsedConcurrently {
        /// 上传令牌
        token: String,
    },

    /// 授权令牌非法或过期
    #[error("Invalid authorization token. Server said: {message} ({code})")]
    InvalidAuthToken {
        /// 服务端给出的原因
        message: String,
        /// 服务端错误码
        code: String,
    },

    /// 没有权限执行该操作
    #[error("{message} ({code})")]
    Unauthorized {
        /// 服务端给出的原因，会话层会附加应用密钥的权限说明
        message: String,
        /// 服务端错误码
        code: String,
    },

    /// 存储容量超限
    #[error("Cannot upload or copy files, storage cap exceeded")]
    StorageCapExceeded,

    /// 调用次数超限
    #[error("Cannot perform the operation, transaction cap exceeded")]
    TransactionCapExceeded,

    /// 拒绝访问
    #[error("This call with these parameters is not allowed for this auth token")]
    AccessDenied,

    /// 资源冲突
    #[error("Conflict")]
    Conflict,

    /// 请求范围无法满足
    #[error("The range in the request is outside the size of the file")]
    UnsatisfiableRange,

    /// 请求过于频繁
    #[error("Too many requests")]
    TooManyRequests {
        /// 服务端要求的等待秒数
        retry_after_seconds: Option<u64>,
    },

    /// 请求超时
    #[error("Request timeout: {message}")]
    RequestTimeout {
        /// 描述信息
        message: String,
    },

    /// 上传过程中请求超时，重试前必须更换上传地址
    #[error("Request timeout during upload")]
    RequestTimeoutDuringUpload,

    /// 服务端内部错误
    #[error("Service error: {message}")]
    ServiceError {
        /// 描述信息
        message: String,
    },

    /// 未知错误
    #[error("Unknown error: {message}")]
    Unknown {
        /// 描述信息
        message: String,
    },

    /// 账户信息缺失
    #[error("Missing account data: {key}")]
    MissingAccountData {
        /// 缺失的字段名
        key: String,
    },

    /// 账户信息文件损坏
    #[error("Corrupt account info file: {path}. Try removing and then re-authorizing the account")]
    CorruptAccountInfo {
        /// 文件路径
        path: String,
    },

    /// 文件名不符合命名规则
    #[error("Unusable file name: {message}")]
    UnusableFileName {
        /// 描述信息
        message: String,
    },

    /// 元信息指令非法
    #[error("Invalid metadata directive: {message}")]
    InvalidMetadataDirective {
        /// 描述信息
        message: String,
    },

    /// 服务端拷贝参数不一致
    #[error("Copy arguments mismatch: {message}")]
    CopyArgumentsMismatch {
        /// 描述信息
        message: String,
    },

    /// 请求范围参数非法
    #[error("Invalid range: requested {range_start}-{range_end} for content of length {content_length}")]
    InvalidRange {
        /// 对象总长度
        content_length: u64,
        /// 请求范围起点
        range_start: u64,
        /// 请求范围终点
        range_end: u64,
    },

    /// 参数非法
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// 描述信息
        message: String,
    },

    /// 超出最大文件长度
    #[error("Allowed file size of exceeded: {size} > {max_allowed_size}")]
    MaxFileSizeExceeded {
        /// 文件长度
        size: u64,
        /// 允许的最大长度
        max_allowed_size: u64,
    },

    /// 校验和不匹配
    #[error("{checksum_type} checksum mismatch -- bad data, expected {expected}, actual {actual}")]
    ChecksumMismatch {
        /// 校验和类型
        checksum_type: &'static str,
        /// 期望值
        expected: String,
        /// 实际值
        actual: String,
    },

    /// 下载内容长度不足
    #[error("Only {bytes_read} of {file_size} bytes read")]
    TruncatedOutput {
        /// 已读取的字节数
        bytes_read: u64,
        /// 期望的字节数
        file_size: u64,
    },

    /// 多次重试后依然失败
    #[error("FAILED to upload after {attempts} tries. Encountered exceptions: {}", join_causes(.causes))]
    MaxRetriesExceeded {
        /// 尝试次数
        attempts: usize,
        /// 每次尝试的失败原因
        causes: Vec<Error>,
    },

    /// 同一大文件的其他分片已经失败，本分片不再尝试
    #[error("Already failed: {message}")]
    AlreadyFailed {
        /// 先前的失败原因
        message: String,
    },
}

fn join_causes(causes: &[Error]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// 该错误是否可以原样重试
    pub fn should_retry_http(&self) -> bool {
        match self {
            Self::Connection(err) => transport_kind_is_retryable(err.kind()),
            Self::UploadTokenUsedConcurrently { .. }
            | Self::TooManyRequests { .. }
            | Self::RequestTimeout { .. }
            | Self::RequestTimeoutDuringUpload
            | Self::ServiceError { .. } => true,
            _ => false,
        }
    }

    /// 该错误是否可以在更换上传地址后重试上传
    pub fn should_retry_upload(&self) -> bool {
        match self {
            Self::InvalidAuthToken { .. } | Self::Unauthorized { .. } => true,
            _ => self.should_retry_http(),
        }
    }

    /// 服务端要求的重试等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TooManyRequests {
                retry_after_seconds: Some(seconds),
            } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

fn transport_kind_is_retryable(kind: ResponseErrorKind) -> bool {
    matches!(
        kind,
        ResponseErrorKind::ConnectError
            | ResponseErrorKind::ProxyError
            | ResponseErrorKind::UnknownHostError
            | ResponseErrorKind::ConnectionReset
            | ResponseErrorKind::BrokenPipe
            | ResponseErrorKind::TimeoutError
            | ResponseErrorKind::SslError
    )
}

/// B2 API 结果
pub type ApiResult<T> = Result<T, Error>;

/// 将服务端错误响应解释为典型错误
///
/// 依据 HTTP 状态码，服务端错误码与描述信息，以及响应头中的 `Retry-After`。
pub fn interpret_error(status: u16, code: Option<&str>, message: Option<&str>, headers: &HeaderMap) -> Error {
    let code = code.unwrap_or_default();
    let message = message.unwrap_or_default();
    match (status, code) {
        (400, "already_hidden") => Error::FileAlreadyHidden {
            file_name: message.to_owned(),
        },
        (400, "bad_json") => Error::BadJson {
            message: message.to_owned(),
        },
        (400, "no_such_file") | (400, "file_not_present") | (404, "not_found") => Error::FileNotPresent {
            file_id_or_name: message.to_owned(),
        },
        (404, _) => Error::ResourceNotFound,
        (400, "duplicate_bucket_name") => Error::DuplicateBucketName {
            bucket_name: message.to_owned(),
        },
        (400, "missing_part") => Error::MissingPart {
            file_id: message.to_owned(),
        },
        (400, "part_sha1_mismatch") => Error::PartSha1Mismatch {
            file_id: message.to_owned(),
        },
        (400, "bad_bucket_id") => Error::BucketIdNotFound {
            bucket_id: message.to_owned(),
        },
        (400, "bad_request") => {
            if let Some(captures) = UPLOAD_TOKEN_USED_CONCURRENTLY_RE.captures(message) {
                Error::UploadTokenUsedConcurrently {
                    token: captures["token"].to_owned(),
                }
            } else {
                Error::BadRequest {
                    message: message.to_owned(),
                    code: code.to_owned(),
                }
            }
        }
        (400, _) => Error::BadRequest {
            message: message.to_owned(),
            code: code.to_owned(),
        },
        (401, "bad_auth_token") | (401, "expired_auth_token") => Error::InvalidAuthToken {
            message: message.to_owned(),
            code: code.to_owned(),
        },
        (401, _) => Error::Unauthorized {
            message: message.to_owned(),
            code: code.to_owned(),
        },
        (403, "storage_cap_exceeded") => Error::StorageCapExceeded,
        (403, "transaction_cap_exceeded") => Error::TransactionCapExceeded,
        (403, "access_denied") => Error::AccessDenied,
        (408, _) => Error::RequestTimeout {
            message: message.to_owned(),
        },
        (409, _) => Error::Conflict,
        (416, "range_not_satisfiable") => Error::UnsatisfiableRange,
        (429, _) => Error::TooManyRequests {
            retry_after_seconds: parse_retry_after(headers),
        },
        (500..=599, _) => Error::ServiceError {
            message: format!("{status} {code} {message}"),
        },
        _ => Error::Unknown {
            message: format!("{status} {code} {message}"),
        },
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// 最大允许的服务端时钟偏差
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(10 * 60);

/// 检查服务端时钟偏差
///
/// 读取响应的 `Date` 头并与本地 UTC 时间比较，偏差超过十分钟则返回 [`Error::ClockSkew`]。
/// 响应没有 `Date` 头时视为通过。
pub fn check_clock_skew(headers: &HeaderMap) -> ApiResult<()> {
    let Some(server_date) = headers.get(b2_http::header::DATE) else {
        return Ok(());
    };
    let server_date_str = server_date.to_str().map_err(|_| Error::BadDateFormat {
        date: format!("{server_date:?}"),
    })?;
    let server_time = chrono::DateTime::parse_from_rfc2822(server_date_str).map_err(|_| Error::BadDateFormat {
        date: server_date_str.to_owned(),
    })?;
    let skew_seconds = (chrono::Utc::now() - server_time.with_timezone(&chrono::Utc)).num_seconds();
    if skew_seconds.unsigned_abs() > MAX_CLOCK_SKEW.as_secs() {
        return Err(Error::ClockSkew { skew_seconds });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use b2_http::HeaderValue;

    #[test]
    fn test_interpret_error_mapping() {
        let headers = HeaderMap::new();
        assert!(matches!(
            interpret_error(400, Some("already_hidden"), Some("f.txt"), &headers),
            Error::FileAlreadyHidden { .. }
        ));
        assert!(matches!(
            interpret_error(400, Some("no_such_file"), None, &headers),
            Error::FileNotPresent { .. }
        ));
        assert!(matches!(
            interpret_error(404, Some("whatever"), None, &headers),
            Error::ResourceNotFound
        ));
        assert!(matches!(
            interpret_error(401, Some("expired_auth_token"), Some("expired"), &headers),
            Error::InvalidAuthToken { .. }
        ));
        assert!(matches!(
            interpret_error(401, Some("unauthorized"), Some("nope"), &headers),
            Error::Unauthorized { .. }
        ));
        assert!(matches!(
            interpret_error(403, Some("storage_cap_exceeded"), None, &headers),
            Error::StorageCapExceeded
        ));
        assert!(matches!(interpret_error(409, None, None, &headers), Error::Conflict));
        assert!(matches!(
            interpret_error(416, Some("range_not_satisfiable"), None, &headers),
            Error::UnsatisfiableRange
        ));
        assert!(matches!(
            interpret_error(503, Some("unavailable"), Some("try later"), &headers),
            Error::ServiceError { .. }
        ));
    }

    #[test]
    fn test_interpret_upload_token_used_concurrently() {
        let headers = HeaderMap::new();
        let err = interpret_error(
            400,
            Some("bad_request"),
            Some("more than one upload using auth token SOME_TOKEN"),
            &headers,
        );
        match err {
            Error::UploadTokenUsedConcurrently { token } => assert_eq!(token, "SOME_TOKEN"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("15"));
        let err = interpret_error(429, None, None, &headers);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(15)));
        assert!(err.should_retry_http());
        assert!(err.should_retry_upload());
    }

    #[test]
    fn test_retryability_flags() {
        let headers = HeaderMap::new();
        let fatal = interpret_error(403, Some("access_denied"), None, &headers);
        assert!(!fatal.should_retry_http());
        assert!(!fatal.should_retry_upload());

        let auth = interpret_error(401, Some("bad_auth_token"), None, &headers);
        assert!(!auth.should_retry_http());
        assert!(auth.should_retry_upload());

        let timeout = interpret_error(408, None, Some("slow"), &headers);
        assert!(timeout.should_retry_http());
        assert!(timeout.should_retry_upload());
    }

    #[test]
    fn test_check_clock_skew() {
        let mut headers = HeaderMap::new();
        let now = chrono::Utc::now().to_rfc2822();
        headers.insert(b2_http::header::DATE, HeaderValue::from_str(&now).unwrap());
        assert!(check_clock_skew(&headers).is_ok());

        let skewed = (chrono::Utc::now() - chrono::Duration::minutes(11)).to_rfc2822();
        headers.insert(b2_http::header::DATE, HeaderValue::from_str(&skewed).unwrap());
        assert!(matches!(check_clock_skew(&headers), Err(Error::ClockSkew { .. })));

        headers.insert(b2_http::header::DATE, HeaderValue::from_static("not a date"));
        assert!(matches!(check_clock_skew(&headers), Err(Error::BadDateFormat { .. })));
    }
}
