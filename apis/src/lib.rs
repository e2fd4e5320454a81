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

//! # b2-apis
//!
//! ## B2 协议操作
//!
//! 定义全部协议操作的接口，提供真实的 HTTP 实现与内存模拟实现，
//! 以及负责授权注入，令牌轮换与上传地址池化的会话。

mod client;
mod file_name;
mod raw;
mod session;
mod simulator;
mod types;

pub use client::{b2_url_decode, b2_url_encode, validate_metadata_directive, B2RawClient};
pub use file_name::validate_file_name;
pub use raw::{RawApi, AUTO_CONTENT_TYPE, HEX_DIGITS_AT_END};
pub use session::Session;
pub use simulator::{RawSimulator, SIMULATOR_MIN_PART_SIZE};
pub use types::{
    AccountAuthorization, Bucket, ByteRange, CancelledLargeFile, DeletedFileVersion, DownloadAuthorization,
    DownloadVersion, EncryptionSetting, FileInfo, FileRetention, FileVersion, LegalHold, ListFileNamesResponse,
    ListFileVersionsResponse, ListPartsResponse, ListUnfinishedLargeFilesResponse, MetadataDirective, Part,
    UnfinishedLargeFile, UploadUrlResponse, SRC_LAST_MODIFIED_MILLIS,
};

pub use b2_account as account;
pub use b2_http as http;
pub use b2_http_client as http_client;
pub use b2_ureq as ureq;
pub use b2_utils as utils;
