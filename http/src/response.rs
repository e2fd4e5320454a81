use super::error::Result as ResponseErrorResult;
use assert_impl::assert_impl;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    response::Response as HTTPResponse,
    status::StatusCode,
    Extensions, Version,
};
use std::{
    fmt,
    io::{Cursor, Read, Result as IoResult},
    mem::take,
};

/// 响应体
///
/// 对于真实请求是网络数据流，对于模拟实现是内存中的字节串。
pub enum ResponseBody {
    /// 数据流响应体
    Reader(Box<dyn Read + Send>),

    /// 内存响应体
    Bytes(Cursor<Vec<u8>>),
}

impl ResponseBody {
    /// 创建数据流响应体
    #[inline]
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    /// 创建内存响应体
    #[inline]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(Cursor::new(bytes))
    }

    /// 读取整个响应体
    pub fn into_bytes(mut self) -> IoResult<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.into_inner()),
            Self::Reader(_) => {
                let mut buf = Vec::new();
                self.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl Default for ResponseBody {
    #[inline]
    fn default() -> Self {
        Self::from_bytes(Default::default())
    }
}

impl Read for ResponseBody {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match self {
            Self::Reader(reader) => reader.read(buf),
            Self::Bytes(bytes) => bytes.read(buf),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader(_) => f.debug_tuple("Reader").finish(),
            Self::Bytes(bytes) => f.debug_struct("Bytes").field("size", &bytes.get_ref().len()).finish(),
        }
    }
}

/// HTTP 响应
///
/// 封装 HTTP 响应相关字段
#[derive(Debug, Default)]
pub struct Response {
    inner: HTTPResponse<ResponseBody>,
}

impl Response {
    /// 返回 HTTP 响应构建器
    #[inline]
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// 响应状态码
    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.inner.status()
    }

    /// HTTP 版本
    #[inline]
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// 响应 HTTP Headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// 获取响应 Header
    #[inline]
    pub fn header(&self, header_name: HeaderName) -> Option<&HeaderValue> {
        self.inner.headers().get(header_name)
    }

    /// 扩展字段
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        self.inner.extensions()
    }

    /// 响应体
    #[inline]
    pub fn body(&self) -> &ResponseBody {
        self.inner.body()
    }

    /// 修改响应体
    #[inline]
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        self.inner.body_mut()
    }

    /// 取出响应体
    #[inline]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// 拆分响应为响应信息与响应体
    #[inline]
    pub fn into_parts(self) -> (http::response::Parts, ResponseBody) {
        self.inner.into_parts()
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
    }
}

/// HTTP 响应构建器
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    inner: Response,
}

impl ResponseBuilder {
    /// 设置响应状态码
    #[inline]
    pub fn status_code(&mut self, status_code: StatusCode) -> &mut Self {
        *self.inner.inner.status_mut() = status_code;
        self
    }

    /// 设置 HTTP 版本
    #[inline]
    pub fn version(&mut self, version: Version) -> &mut Self {
        *self.inner.inner.version_mut() = version;
        self
    }

    /// 设置响应 HTTP Headers
    #[inline]
    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        *self.inner.inner.headers_mut() = headers;
        self
    }

    /// 添加响应 Header
    #[inline]
    pub fn header(&mut self, header_name: HeaderName, header_value: HeaderValue) -> &mut Self {
        self.inner.inner.headers_mut().insert(header_name, header_value);
        self
    }

    /// 设置扩展字段
    #[inline]
    pub fn extensions(&mut self, extensions: Extensions) -> &mut Self {
        *self.inner.inner.extensions_mut() = extensions;
        self
    }

    /// 设置响应体
    #[inline]
    pub fn body(&mut self, body: ResponseBody) -> &mut Self {
        *self.inner.inner.body_mut() = body;
        self
    }

    /// 构建 HTTP 响应，同时构建器被重置
    #[inline]
    pub fn build(&mut self) -> Response {
        take(&mut self.inner)
    }
}

/// HTTP 响应结果
pub type Result = ResponseErrorResult<Response>;
