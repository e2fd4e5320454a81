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

//! # b2-account
//!
//! ## B2 账户状态存储
//!
//! 保管授权状态（账户 ID，授权令牌，API / 下载地址，分片大小限制，权限描述符）
//! 以及上传地址池。提供内存实现与持久化到本地文件的实现。

mod account_info;
mod allowed;
mod file;
mod in_memory;
mod upload_url_pool;

pub use account_info::{AccountInfo, AuthData, AuthDataBuilder};
pub use allowed::{Allowed, ALL_CAPABILITIES};
pub use file::{default_account_info_file, FileAccountInfo, ACCOUNT_INFO_ENV_VAR};
pub use in_memory::InMemoryAccountInfo;
pub use upload_url_pool::{UploadUrl, UploadUrlPool};

pub use b2_http_client as http_client;
