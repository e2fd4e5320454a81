#![deny(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    non_ascii_idents,
    indirect_structural_match,
    trivial_numeric_casts,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

mod error;
mod extensions;
mod request;
mod response;

use std::fmt::Debug;

pub use http::{
    header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue},
    method::Method,
    status::{InvalidStatusCode, StatusCode},
    uri::{self, Uri},
    Extensions, Version,
};

pub use error::{Error as ResponseError, ErrorBuilder as ResponseErrorBuilder, ErrorKind as ResponseErrorKind};
pub use extensions::TimeoutExtension;
pub use request::{Request, RequestBody, RequestBuilder, TransferProgressInfo, UserAgent};
pub use response::{Response, ResponseBody, ResponseBuilder, Result as ResponseResult};

/// HTTP 请求处理接口
///
/// 实现该接口，即可处理所有发出的 HTTP 请求。
/// 处理过程中不做任何重试，重试逻辑由上层的 HTTP 客户端负责。
pub trait HttpCaller: Debug + Send + Sync {
    /// 发出 HTTP 请求并等待响应
    fn call(&self, request: &mut Request<'_>) -> ResponseResult;
}

impl<T: HttpCaller + ?Sized> HttpCaller for std::sync::Arc<T> {
    #[inline]
    fn call(&self, request: &mut Request<'_>) -> ResponseResult {
        self.as_ref().call(request)
    }
}

impl<T: HttpCaller + ?Sized> HttpCaller for Box<T> {
    #[inline]
    fn call(&self, request: &mut Request<'_>) -> ResponseResult {
        self.as_ref().call(request)
    }
}
