use b2_http_client::{ApiResult, Error};

const MAX_FILE_NAME_BYTES: usize = 1024;
const MAX_SEGMENT_BYTES: usize = 250;

/// 校验对象名是否符合命名规则
///
/// 规则：UTF-8 长度 1..=1024 字节；不含小于 0x20 的控制字节与 0x7F；
/// 不以 `/` 开头或结尾；不含 `//`；以 `/` 分隔的每一段不超过 250 字节。
pub fn validate_file_name(file_name: &str) -> ApiResult<()> {
    let bytes = file_name.as_bytes();
    if bytes.is_empty() {
        return unusable(file_name, "empty file name");
    }
    if bytes.len() > MAX_FILE_NAME_BYTES {
        return unusable(file_name, "file name too long");
    }
    if bytes.iter().any(|&byte| byte < 0x20) {
        return unusable(file_name, "file name contains control characters");
    }
    if bytes.contains(&0x7F) {
        return unusable(file_name, "file name contains DEL character");
    }
    if file_name.starts_with('/') {
        return unusable(file_name, "file name must not start with '/'");
    }
    if file_name.ends_with('/') {
        return unusable(file_name, "file name must not end with '/'");
    }
    if file_name.contains("//") {
        return unusable(file_name, "file name must not contain '//'");
    }
    if file_name.split('/').any(|segment| segment.len() > MAX_SEGMENT_BYTES) {
        return unusable(file_name, "file name segment too long");
    }
    Ok(())
}

fn unusable(file_name: &str, reason: &str) -> ApiResult<()> {
    Err(Error::UnusableFileName {
        message: format!("{reason}: {file_name:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_names() {
        for name in ["a", "a/b/c.txt", "日志/2024.log", "Kitten Videos", "a".repeat(1024).as_str()] {
            validate_file_name(name).unwrap();
        }
    }

    #[test]
    fn test_illegal_names() {
        let too_long = "x".repeat(1025);
        for name in ["", "/a", "a/", "a//b", "a\u{7f}b", "a\nb", "a\u{1}b", too_long.as_str()] {
            assert!(validate_file_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_segment_length_boundary() {
        let exactly_250 = format!("{}/rest", "s".repeat(250));
        validate_file_name(&exactly_250).unwrap();
        let too_long_segment = format!("{}/rest", "s".repeat(251));
        assert!(matches!(
            validate_file_name(&too_long_segment),
            Err(Error::UnusableFileName { .. })
        ));
    }
}
