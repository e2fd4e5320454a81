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

mod name;
mod progress;
mod sha1;

pub use name::join_b2_path;
pub use progress::{NopProgressListener, ProgressListener, ProgressScope};
pub use sha1::{hex_sha1_of_bytes, hex_sha1_of_stream, HEX_SHA1_SIZE};
