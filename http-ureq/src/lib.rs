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

//! # b2-ureq
//!
//! ## B2 Ureq HTTP 客户端实现
//!
//! 基于 Ureq 库提供 HTTP 客户端接口实现，仅提供阻塞接口的实现。

mod client;

pub use client::Client;

pub use b2_http as http;
pub use ureq;
