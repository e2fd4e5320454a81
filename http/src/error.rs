use anyhow::Error as AnyError;
use http::uri::Uri;
use std::{error, fmt, result};

/// HTTP 响应错误类型
#[non_exhaustive]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// 非法的 URL
    InvalidUrl,

    /// 非法的 HTTP 头
    InvalidHeader,

    /// 网络连接失败
    ConnectError,

    /// 代理连接失败
    ProxyError,

    /// 域名解析失败
    UnknownHostError,

    /// 连接被重置
    ConnectionReset,

    /// 管道破裂
    BrokenPipe,

    /// 超时失败
    TimeoutError,

    /// SSL 错误
    SslError,

    /// 重定向次数过多
    TooManyRedirect,

    /// 非法的请求 / 响应错误
    InvalidRequestResponse,

    /// 本地 IO 错误
    LocalIoError,

    /// 回调函数错误
    CallbackError,

    /// 未知错误
    UnknownError,
}

/// HTTP 响应错误
///
/// 仅描述传输层面的失败，服务端返回的业务错误由上层客户端解析。
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: AnyError,
    uri: Option<Uri>,
}

impl Error {
    /// 创建 HTTP 响应错误构建器
    #[inline]
    pub fn builder(kind: ErrorKind, cause: impl Into<AnyError>) -> ErrorBuilder {
        ErrorBuilder::new(kind, cause)
    }

    /// 创建带描述信息的 HTTP 响应错误构建器
    #[inline]
    pub fn builder_with_msg(kind: ErrorKind, msg: impl fmt::Display) -> ErrorBuilder {
        ErrorBuilder::new(kind, AnyError::msg(msg.to_string()))
    }

    /// 获取错误类型
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取发生错误的 URL
    #[inline]
    pub fn uri(&self) -> Option<&Uri> {
        self.uri.as_ref()
    }

    /// 获取错误原因
    #[inline]
    pub fn cause(&self) -> &AnyError {
        &self.cause
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.cause)
    }
}

impl error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// HTTP 响应错误构建器
#[derive(Debug)]
pub struct ErrorBuilder {
    inner: Error,
}

impl ErrorBuilder {
    fn new(kind: ErrorKind, cause: impl Into<AnyError>) -> Self {
        Self {
            inner: Error {
                kind,
                cause: cause.into(),
                uri: None,
            },
        }
    }

    /// 设置发生错误的 URL
    #[inline]
    pub fn uri(mut self, uri: &Uri) -> Self {
        self.inner.uri = Some(uri.to_owned());
        self
    }

    /// 构建 HTTP 响应错误
    #[inline]
    pub fn build(self) -> Error {
        self.inner
    }
}

/// HTTP 响应结果
pub type Result<T> = result::Result<T, Error>;
