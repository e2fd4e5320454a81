use anyhow::Error as AnyError;
use b2_http::{
    header::{CONTENT_LENGTH, USER_AGENT},
    HeaderName, HeaderValue, HttpCaller, Request, Response, ResponseBody, ResponseError,
    ResponseErrorKind, ResponseResult, StatusCode, TimeoutExtension, TransferProgressInfo, Version,
};
use std::{
    error::Error as StdError,
    fmt::Display,
    io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult},
    time::Duration,
};
use ureq::{Agent, AgentBuilder, Error as UreqError, ErrorKind as UreqErrorKind, Request as UreqRequest, Response as UreqResponse};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(46);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(128);

/// Ureq 客户端
#[derive(Debug, Clone)]
pub struct Client {
    client: Agent,
}

impl Client {
    /// 创建 Ureq 客户端
    #[inline]
    pub fn new(client: Agent) -> Self {
        Self { client }
    }
}

impl From<Agent> for Client {
    #[inline]
    fn from(agent: Agent) -> Self {
        Self::new(agent)
    }
}

impl Default for Client {
    #[inline]
    fn default() -> Self {
        Self {
            client: AgentBuilder::new()
                .timeout_connect(DEFAULT_CONNECT_TIMEOUT)
                .timeout_read(DEFAULT_READ_TIMEOUT)
                .build(),
        }
    }
}

impl HttpCaller for Client {
    fn call(&self, request: &mut Request<'_>) -> ResponseResult {
        let mut user_cancelled_error: Option<ResponseError> = None;

        let ureq_request = make_ureq_request(&self.client, request)?;
        let body_size = request.body().size();
        match ureq_request.send(RequestBodyWithCallbacks::new(request, body_size, &mut user_cancelled_error)) {
            Ok(response) => make_ureq_sync_response(response, request),
            Err(err) => {
                let kind = err.kind();
                match err {
                    UreqError::Status(_, response) => make_ureq_sync_response(response, request),
                    UreqError::Transport(transport) => user_cancelled_error
                        .map_or_else(|| Err(from_ureq_error(kind, AnyError::new(transport), request)), Err),
                }
            }
        }
    }
}

fn make_user_agent(request: &Request<'_>) -> Result<HeaderValue, ResponseError> {
    let user_agent = format!("{}/b2-ureq", request.user_agent());
    HeaderValue::from_str(&user_agent).map_err(|err| build_header_value_error(request, &user_agent, &err))
}

fn make_ureq_request(agent: &Agent, request: &Request<'_>) -> Result<UreqRequest, ResponseError> {
    let mut request_builder = agent.request(request.method().as_str(), &request.url().to_string());
    for (header_name, header_value) in request.headers() {
        request_builder = set_header_for_request_builder(request_builder, request, header_name, header_value)?;
    }
    request_builder =
        set_header_for_request_builder(request_builder, request, &USER_AGENT, &make_user_agent(request)?)?;
    request_builder = request_builder.set(CONTENT_LENGTH.as_str(), &request.body().size().to_string());
    if let Some(extension) = request.extensions().get::<TimeoutExtension>() {
        request_builder = request_builder.timeout(extension.get());
    }
    Ok(request_builder)
}

fn make_ureq_sync_response(response: UreqResponse, request: &mut Request<'_>) -> ResponseResult {
    let mut response_builder = Response::builder();
    response_builder
        .status_code(status_code_of_response(&response, request)?)
        .version(parse_http_version(response.http_version(), request)?);
    for header_name_str in response.headers_names() {
        if let Some(header_value_str) = response.header(&header_name_str) {
            let header_name = HeaderName::from_bytes(header_name_str.as_bytes())
                .map_err(|err| build_header_name_error(request, &header_name_str, &err))?;
            let header_value = HeaderValue::from_bytes(header_value_str.as_bytes())
                .map_err(|err| build_header_value_error(request, header_value_str, &err))?;
            response_builder.header(header_name, header_value);
        }
    }
    response_builder.body(ResponseBody::from_reader(ResponseReaderWrapper(response.into_reader())));
    return Ok(response_builder.build());

    struct ResponseReaderWrapper<R>(R);

    impl<R: Read> Read for ResponseReaderWrapper<R> {
        #[inline]
        fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
            self.0.read(buf)
        }
    }
}

fn build_status_code_error(request: &Request<'_>, code: u16, err: &dyn Display) -> ResponseError {
    ResponseError::builder_with_msg(
        ResponseErrorKind::InvalidRequestResponse,
        format!("invalid status code({}): {}", code, err),
    )
    .uri(request.url())
    .build()
}

fn build_header_name_error(request: &Request<'_>, header_name: &str, err: &dyn Display) -> ResponseError {
    ResponseError::builder_with_msg(
        ResponseErrorKind::InvalidHeader,
        format!("invalid header name({}): {}", header_name, err),
    )
    .uri(request.url())
    .build()
}

fn build_header_value_error(request: &Request<'_>, header_value: &str, err: &dyn Display) -> ResponseError {
    ResponseError::builder_with_msg(
        ResponseErrorKind::InvalidHeader,
        format!("invalid header value({}): {}", header_value, err),
    )
    .uri(request.url())
    .build()
}

fn convert_header_value_error(request: &Request<'_>, header_value: &HeaderValue, err: &dyn Display) -> ResponseError {
    ResponseError::builder_with_msg(
        ResponseErrorKind::InvalidHeader,
        format!("invalid header value({:?}): {}", header_value, err),
    )
    .uri(request.url())
    .build()
}

fn set_header_for_request_builder(
    request_builder: UreqRequest,
    request: &Request<'_>,
    header_name: &HeaderName,
    header_value: &HeaderValue,
) -> Result<UreqRequest, ResponseError> {
    Ok(request_builder.set(
        header_name.as_str(),
        header_value
            .to_str()
            .map_err(|err| convert_header_value_error(request, header_value, &err))?,
    ))
}

fn status_code_of_response(response: &UreqResponse, request: &Request<'_>) -> Result<StatusCode, ResponseError> {
    StatusCode::from_u16(response.status()).map_err(|err| build_status_code_error(request, response.status(), &err))
}

fn parse_http_version(version: &str, request: &Request<'_>) -> Result<Version, ResponseError> {
    match version {
        "HTTP/0.9" => Ok(Version::HTTP_09),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/2.0" => Ok(Version::HTTP_2),
        "HTTP/3.0" => Ok(Version::HTTP_3),
        _ => Err(ResponseError::builder_with_msg(
            ResponseErrorKind::InvalidRequestResponse,
            format!("invalid http version: {}", version),
        )
        .uri(request.url())
        .build()),
    }
}

fn from_ureq_error(kind: UreqErrorKind, err: AnyError, request: &Request<'_>) -> ResponseError {
    let response_error_kind = match kind {
        UreqErrorKind::InvalidUrl => ResponseErrorKind::InvalidUrl,
        UreqErrorKind::UnknownScheme => ResponseErrorKind::InvalidUrl,
        UreqErrorKind::Dns => ResponseErrorKind::UnknownHostError,
        UreqErrorKind::ConnectionFailed => ResponseErrorKind::ConnectError,
        UreqErrorKind::TooManyRedirects => ResponseErrorKind::TooManyRedirect,
        UreqErrorKind::BadStatus => ResponseErrorKind::InvalidRequestResponse,
        UreqErrorKind::BadHeader => ResponseErrorKind::InvalidHeader,
        UreqErrorKind::Io => io_error_kind(&err),
        UreqErrorKind::InvalidProxyUrl => ResponseErrorKind::ProxyError,
        UreqErrorKind::ProxyConnect => ResponseErrorKind::ProxyError,
        UreqErrorKind::ProxyUnauthorized => ResponseErrorKind::ProxyError,
        UreqErrorKind::HTTP => ResponseErrorKind::InvalidRequestResponse,
        UreqErrorKind::InsecureRequestHttpsOnly => ResponseErrorKind::SslError,
    };
    ResponseError::builder(response_error_kind, err)
        .uri(request.url())
        .build()
}

fn io_error_kind(err: &AnyError) -> ResponseErrorKind {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err.as_ref());
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<IoError>() {
            return match io_error.kind() {
                IoErrorKind::ConnectionReset | IoErrorKind::ConnectionAborted => ResponseErrorKind::ConnectionReset,
                IoErrorKind::BrokenPipe => ResponseErrorKind::BrokenPipe,
                IoErrorKind::TimedOut | IoErrorKind::WouldBlock => ResponseErrorKind::TimeoutError,
                IoErrorKind::ConnectionRefused | IoErrorKind::NotConnected => ResponseErrorKind::ConnectError,
                _ => ResponseErrorKind::LocalIoError,
            };
        }
        source = cause.source();
    }
    ResponseErrorKind::LocalIoError
}

struct RequestBodyWithCallbacks<'a, 'r> {
    request: &'a mut Request<'r>,
    size: u64,
    have_read: u64,
    user_cancelled_error: &'a mut Option<ResponseError>,
}

impl<'a, 'r> RequestBodyWithCallbacks<'a, 'r> {
    fn new(request: &'a mut Request<'r>, size: u64, user_cancelled_error: &'a mut Option<ResponseError>) -> Self {
        Self {
            request,
            size,
            user_cancelled_error,
            have_read: 0,
        }
    }
}

impl Read for RequestBodyWithCallbacks<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.request.body_mut().read(buf)?;
        match n {
            0 => Ok(0),
            n => {
                self.have_read += n as u64;
                let buf = &buf[..n];
                if let Some(on_uploading_progress) = self.request.on_uploading_progress() {
                    on_uploading_progress(TransferProgressInfo::new(self.have_read, self.size, buf)).map_err(
                        |err| {
                            *self.user_cancelled_error = Some(
                                ResponseError::builder(ResponseErrorKind::CallbackError, err)
                                    .uri(self.request.url())
                                    .build(),
                            );
                            IoError::new(IoErrorKind::Other, "on_uploading_progress() callback returns error")
                        },
                    )?;
                }
                Ok(n)
            }
        }
    }
}
