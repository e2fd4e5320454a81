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

//! # b2-http-client
//!
//! ## B2 HTTP 客户端
//!
//! 基于 [`b2_http`] 提供的传输接口，补充错误解释，时钟偏差检查与重试退避策略，
//! 作为所有协议调用的统一出入口。

mod backoff;
mod error;
mod http_client;
mod retry;

pub use backoff::{
    default_backoff, Backoff, BackoffOptions, ExponentialBackoff, FixedBackoff, LimitedBackoff, RandomizedBackoff,
    Ratio,
};
pub use error::{check_clock_skew, interpret_error, ApiResult, Error, MAX_CLOCK_SKEW};
pub use http_client::{
    BodyOpener, HttpClient, HttpClientBuilder, COPY_REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use retry::{retry_call, TryCount};

pub use b2_http as http;
