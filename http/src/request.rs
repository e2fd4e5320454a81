use anyhow::Result as AnyResult;
use assert_impl::assert_impl;
use http::{
    header::HeaderMap,
    method::Method,
    request::Request as HTTPRequest,
    uri::Uri,
    Extensions,
};
use once_cell::sync::Lazy;
use std::{
    borrow::Cow,
    fmt,
    io::{Cursor, Read, Result as IoResult},
    mem::take,
};

/// 用户代理
pub type UserAgent = Cow<'static, str>;

static FULL_USER_AGENT: Lazy<Box<str>> =
    Lazy::new(|| format!("B2Rust/b2-http-{}", env!("CARGO_PKG_VERSION")).into());

/// 上传进度信息
#[derive(Debug, Copy, Clone)]
pub struct TransferProgressInfo<'b> {
    transferred_bytes: u64,
    total_bytes: u64,
    body: &'b [u8],
}

impl<'b> TransferProgressInfo<'b> {
    /// 创建上传进度信息
    #[inline]
    pub fn new(transferred_bytes: u64, total_bytes: u64, body: &'b [u8]) -> Self {
        Self {
            transferred_bytes,
            total_bytes,
            body,
        }
    }

    /// 已传输的字节数
    #[inline]
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    /// 总字节数
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// 最近一次传输的内容
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.body
    }
}

type OnProgress<'r> = &'r (dyn Fn(TransferProgressInfo<'_>) -> AnyResult<()> + Send + Sync);

/// 请求体
///
/// 既可以是内存中的字节串，也可以是长度已知的数据流。
pub enum RequestBody<'r> {
    /// 内存请求体
    Bytes(Cursor<Cow<'r, [u8]>>),

    /// 数据流请求体，长度必须已知
    Reader {
        /// 数据流
        reader: Box<dyn Read + Send + 'r>,
        /// 数据流长度
        size: u64,
    },
}

impl<'r> RequestBody<'r> {
    /// 创建内存请求体
    #[inline]
    pub fn from_bytes(bytes: impl Into<Cow<'r, [u8]>>) -> Self {
        Self::Bytes(Cursor::new(bytes.into()))
    }

    /// 创建数据流请求体
    #[inline]
    pub fn from_reader(reader: impl Read + Send + 'r, size: u64) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            size,
        }
    }

    /// 请求体长度
    #[inline]
    pub fn size(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.get_ref().len() as u64,
            Self::Reader { size, .. } => *size,
        }
    }
}

impl Default for RequestBody<'_> {
    #[inline]
    fn default() -> Self {
        Self::from_bytes(Cow::Borrowed(&[][..]))
    }
}

impl Read for RequestBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match self {
            Self::Bytes(bytes) => bytes.read(buf),
            Self::Reader { reader, .. } => reader.read(buf),
        }
    }
}

impl fmt::Debug for RequestBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f
                .debug_struct("Bytes")
                .field("size", &bytes.get_ref().len())
                .finish(),
            Self::Reader { size, .. } => f.debug_struct("Reader").field("size", size).finish(),
        }
    }
}

/// HTTP 请求
///
/// 封装 HTTP 请求相关字段
pub struct Request<'r> {
    inner: HTTPRequest<RequestBody<'r>>,
    appended_user_agent: Cow<'r, str>,
    on_uploading_progress: Option<OnProgress<'r>>,
}

impl<'r> Request<'r> {
    /// 返回 HTTP 请求构建器
    #[inline]
    pub fn builder() -> RequestBuilder<'r> {
        RequestBuilder::default()
    }

    /// 请求 URL
    #[inline]
    pub fn url(&self) -> &Uri {
        self.inner.uri()
    }

    /// 修改请求 URL
    #[inline]
    pub fn url_mut(&mut self) -> &mut Uri {
        self.inner.uri_mut()
    }

    /// 请求 HTTP 方法
    #[inline]
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// 请求 HTTP Headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// 修改请求 HTTP Headers
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// 请求体
    #[inline]
    pub fn body(&self) -> &RequestBody<'r> {
        self.inner.body()
    }

    /// 修改请求体
    #[inline]
    pub fn body_mut(&mut self) -> &mut RequestBody<'r> {
        self.inner.body_mut()
    }

    /// 扩展字段
    #[inline]
    pub fn extensions(&self) -> &Extensions {
        self.inner.extensions()
    }

    /// 修改扩展字段
    #[inline]
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        self.inner.extensions_mut()
    }

    /// 用户代理
    #[inline]
    pub fn user_agent(&self) -> String {
        FULL_USER_AGENT.to_string() + self.appended_user_agent()
    }

    /// 追加的用户代理
    #[inline]
    pub fn appended_user_agent(&self) -> &str {
        &self.appended_user_agent
    }

    /// 上传进度回调
    #[inline]
    pub fn on_uploading_progress(&self) -> Option<OnProgress<'_>> {
        self.on_uploading_progress
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
    }
}

impl Default for Request<'_> {
    #[inline]
    fn default() -> Self {
        Self {
            inner: Default::default(),
            appended_user_agent: Default::default(),
            on_uploading_progress: None,
        }
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", self.inner.uri())
            .field("method", self.inner.method())
            .field("headers", self.inner.headers())
            .field("body", self.inner.body())
            .field("appended_user_agent", &self.appended_user_agent)
            .field(
                "on_uploading_progress",
                &self.on_uploading_progress.map_or("Uninstalled", |_| "Installed"),
            )
            .finish()
    }
}

/// HTTP 请求构建器
#[derive(Default, Debug)]
pub struct RequestBuilder<'r> {
    inner: Request<'r>,
}

impl<'r> RequestBuilder<'r> {
    /// 设置请求 URL
    #[inline]
    pub fn url(&mut self, url: Uri) -> &mut Self {
        *self.inner.url_mut() = url;
        self
    }

    /// 设置请求 HTTP 方法
    #[inline]
    pub fn method(&mut self, method: Method) -> &mut Self {
        *self.inner.inner.method_mut() = method;
        self
    }

    /// 设置请求 HTTP Headers
    #[inline]
    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        *self.inner.headers_mut() = headers;
        self
    }

    /// 设置请求体
    #[inline]
    pub fn body(&mut self, body: RequestBody<'r>) -> &mut Self {
        *self.inner.body_mut() = body;
        self
    }

    /// 设置扩展字段
    #[inline]
    pub fn extensions(&mut self, extensions: Extensions) -> &mut Self {
        *self.inner.extensions_mut() = extensions;
        self
    }

    /// 设置追加的用户代理
    #[inline]
    pub fn appended_user_agent(&mut self, user_agent: impl Into<Cow<'r, str>>) -> &mut Self {
        self.inner.appended_user_agent = user_agent.into();
        self
    }

    /// 设置上传进度回调
    #[inline]
    pub fn on_uploading_progress(&mut self, f: OnProgress<'r>) -> &mut Self {
        self.inner.on_uploading_progress = Some(f);
        self
    }

    /// 构建 HTTP 请求，同时构建器被重置
    #[inline]
    pub fn build(&mut self) -> Request<'r> {
        take(&mut self.inner)
    }

    /// 重置构建器
    #[inline]
    pub fn reset(&mut self) {
        self.inner = Default::default();
    }
}
