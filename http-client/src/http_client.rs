use super::{
    backoff::{default_backoff, Backoff},
    error::{check_clock_skew, interpret_error, ApiResult, Error},
    retry::{retry_call, TryCount},
};
use assert_impl::assert_impl;
use b2_http::{
    Extensions, HeaderMap, HttpCaller, Method, Request, RequestBody, Response, ResponseErrorKind, TimeoutExtension,
    Uri,
};
use serde_json::Value as JsonValue;
use std::{
    borrow::Cow,
    fmt,
    io::Read,
    sync::Arc,
    time::Duration,
};

/// API 请求的缺省整体超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(128);

/// 服务端拷贝请求的整体超时
///
/// 服务端拷贝可能耗时远超普通请求
pub const COPY_REQUEST_TIMEOUT: Duration = Duration::from_secs(1200);

/// 上传请求体提供器
///
/// 每次重试都会被再次调用，返回一个全新的数据流与其长度。
pub type BodyOpener<'a> = &'a (dyn Fn() -> ApiResult<(Box<dyn Read + Send>, u64)> + Sync);

#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// B2 HTTP 客户端
///
/// 组合 HTTP 请求处理接口与重试退避策略，
/// 发出请求并把服务端的 JSON 错误信封解释为典型错误。
/// 不持有任何授权信息，授权头由调用方提供。
#[derive(Clone)]
pub struct HttpClient {
    caller: Arc<dyn HttpCaller>,
    backoff: Arc<dyn Backoff>,
    appended_user_agent: Cow<'static, str>,
    clock_skew_check: bool,
}

impl HttpClient {
    /// 创建 B2 HTTP 客户端构建器
    #[inline]
    pub fn builder(caller: impl HttpCaller + 'static) -> HttpClientBuilder {
        HttpClientBuilder::new(caller)
    }

    /// 创建 B2 HTTP 客户端
    #[inline]
    pub fn new(caller: impl HttpCaller + 'static) -> Self {
        Self::builder(caller).build()
    }

    /// 获取 HTTP 请求处理接口
    #[inline]
    pub fn caller(&self) -> &dyn HttpCaller {
        &self.caller
    }

    /// 发出带 JSON 请求体的 POST 请求并返回解析后的 JSON 响应
    pub fn post_json_return_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        params: &JsonValue,
        try_count: TryCount,
        timeout: Duration,
    ) -> ApiResult<JsonValue> {
        let uri = parse_uri(url)?;
        let body = serde_json::to_vec(params).map_err(|err| Error::InvalidArgument {
            message: format!("cannot serialize request body: {err}"),
        })?;
        retry_call(try_count, self.backoff.as_ref(), || {
            let mut extensions = Extensions::new();
            extensions.insert(TimeoutExtension::new(timeout));
            let mut request = {
                let mut builder = Request::builder();
                builder
                    .url(uri.to_owned())
                    .method(Method::POST)
                    .headers(headers.to_owned())
                    .body(RequestBody::from_bytes(body.as_slice()))
                    .extensions(extensions)
                    .appended_user_agent(self.appended_user_agent.to_string());
                builder.build()
            };
            let response = self.caller.call(&mut request)?;
            self.check_clock(&response)?;
            self.json_of_response(url, response)
        })
    }

    /// 发出携带二进制请求体的 POST 请求并返回解析后的 JSON 响应
    ///
    /// 用于上传接口。请求体由提供器给出，重试时会重新打开。
    pub fn post_content_return_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body_opener: BodyOpener<'_>,
        try_count: TryCount,
    ) -> ApiResult<JsonValue> {
        let uri = parse_uri(url)?;
        retry_call(try_count, self.backoff.as_ref(), || {
            let (reader, size) = body_opener()?;
            let mut request = {
                let mut builder = Request::builder();
                builder
                    .url(uri.to_owned())
                    .method(Method::POST)
                    .headers(headers.to_owned())
                    .body(RequestBody::from_reader(reader, size))
                    .appended_user_agent(self.appended_user_agent.to_string());
                builder.build()
            };
            let response = self.caller.call(&mut request).map_err(|err| reinterpret_upload_timeout(err.into()))?;
            self.check_clock(&response)?;
            self.json_of_response(url, response)
        })
    }

    /// 发出 GET 请求并返回流式响应
    ///
    /// 用于下载接口，重试只覆盖建立响应的过程，响应体读取期间的失败由调用方处理。
    pub fn get_content(&self, url: &str, headers: &HeaderMap, try_count: TryCount) -> ApiResult<Response> {
        let uri = parse_uri(url)?;
        retry_call(try_count, self.backoff.as_ref(), || {
            let mut request = {
                let mut builder = Request::builder();
                builder
                    .url(uri.to_owned())
                    .method(Method::GET)
                    .headers(headers.to_owned())
                    .appended_user_agent(self.appended_user_agent.to_string());
                builder.build()
            };
            let response = self.caller.call(&mut request)?;
            self.check_clock(&response)?;
            if response.status_code().is_success() {
                Ok(response)
            } else {
                Err(self.error_of_response(url, response))
            }
        })
    }

    /// 发出 HEAD 请求并返回响应
    pub fn head(&self, url: &str, headers: &HeaderMap) -> ApiResult<Response> {
        let uri = parse_uri(url)?;
        retry_call(TryCount::HEAD, self.backoff.as_ref(), || {
            let mut request = {
                let mut builder = Request::builder();
                builder
                    .url(uri.to_owned())
                    .method(Method::HEAD)
                    .headers(headers.to_owned())
                    .appended_user_agent(self.appended_user_agent.to_string());
                builder.build()
            };
            let response = self.caller.call(&mut request)?;
            self.check_clock(&response)?;
            if response.status_code().is_success() {
                Ok(response)
            } else {
                Err(self.error_of_response(url, response))
            }
        })
    }

    fn check_clock(&self, response: &Response) -> ApiResult<()> {
        if self.clock_skew_check {
            check_clock_skew(response.headers())?;
        }
        Ok(())
    }

    fn json_of_response(&self, url: &str, response: Response) -> ApiResult<JsonValue> {
        if response.status_code().is_success() {
            let body = self.body_of_response(response)?;
            serde_json::from_slice(&body).map_err(|_| non_json_response_error(url, &body))
        } else {
            Err(self.error_of_response(url, response))
        }
    }

    fn error_of_response(&self, url: &str, response: Response) -> Error {
        let status = response.status_code().as_u16();
        let headers = response.headers().to_owned();
        let body = match self.body_of_response(response) {
            Ok(body) => body,
            Err(err) => return err,
        };
        match serde_json::from_slice::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let status = if envelope.status > 0 { envelope.status } else { status };
                interpret_error(status, envelope.code.as_deref(), envelope.message.as_deref(), &headers)
            }
            Err(_) => non_json_response_error(url, &body),
        }
    }

    fn body_of_response(&self, response: Response) -> ApiResult<Vec<u8>> {
        response.into_body().into_bytes().map_err(|err| {
            b2_http::ResponseError::builder(ResponseErrorKind::ConnectionReset, err)
                .build()
                .into()
        })
    }

    #[allow(dead_code)]
    fn ignore() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("caller", &self.caller)
            .field("backoff", &self.backoff)
            .field("appended_user_agent", &self.appended_user_agent)
            .field("clock_skew_check", &self.clock_skew_check)
            .finish()
    }
}

fn parse_uri(url: &str) -> ApiResult<Uri> {
    url.parse::<Uri>().map_err(|err| {
        b2_http::ResponseError::builder(ResponseErrorKind::InvalidUrl, err)
            .build()
            .into()
    })
}

fn non_json_response_error(url: &str, body: &[u8]) -> Error {
    let looks_like_s3 = url
        .parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(|host| host.starts_with("s3.")))
        .unwrap_or(false);
    if looks_like_s3 {
        Error::PotentialS3EndpointPassedAsRealm { url: url.to_owned() }
    } else {
        Error::InvalidJsonResponse {
            content: String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned(),
        }
    }
}

fn reinterpret_upload_timeout(err: Error) -> Error {
    match err {
        Error::Connection(transport) if transport.kind() == ResponseErrorKind::TimeoutError => {
            Error::RequestTimeoutDuringUpload
        }
        Error::RequestTimeout { .. } => Error::RequestTimeoutDuringUpload,
        err => err,
    }
}

/// B2 HTTP 客户端构建器
pub struct HttpClientBuilder {
    caller: Arc<dyn HttpCaller>,
    backoff: Arc<dyn Backoff>,
    appended_user_agent: Cow<'static, str>,
    clock_skew_check: bool,
}

impl HttpClientBuilder {
    /// 创建 B2 HTTP 客户端构建器
    pub fn new(caller: impl HttpCaller + 'static) -> Self {
        Self {
            caller: Arc::new(caller),
            backoff: Arc::new(default_backoff()),
            appended_user_agent: Default::default(),
            clock_skew_check: true,
        }
    }

    /// 设置重试退避策略
    #[inline]
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// 设置追加的用户代理
    #[inline]
    pub fn appended_user_agent(mut self, user_agent: impl Into<Cow<'static, str>>) -> Self {
        self.appended_user_agent = user_agent.into();
        self
    }

    /// 是否启用时钟偏差检查
    #[inline]
    pub fn clock_skew_check(mut self, enabled: bool) -> Self {
        self.clock_skew_check = enabled;
        self
    }

    /// 构建 B2 HTTP 客户端
    #[inline]
    pub fn build(self) -> HttpClient {
        HttpClient {
            caller: self.caller,
            backoff: self.backoff,
            appended_user_agent: self.appended_user_agent,
            clock_skew_check: self.clock_skew_check,
        }
    }
}

impl fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientBuilder").finish()
    }
}
