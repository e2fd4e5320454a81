use digest::Digest;
use sha1::Sha1;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult};

/// 十六进制 SHA-1 字符串固定长度
pub const HEX_SHA1_SIZE: usize = 40;

const BLOCK_SIZE: usize = 1 << 20;

/// 计算给定字节串的十六进制 SHA-1
pub fn hex_sha1_of_bytes(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// 计算输入流前 `content_length` 个字节的十六进制 SHA-1
///
/// 如果流在读完 `content_length` 个字节前就结束，返回 [`IoErrorKind::UnexpectedEof`] 错误。
pub fn hex_sha1_of_stream(reader: &mut dyn Read, content_length: u64) -> IoResult<String> {
    let mut digest = Sha1::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut remaining = content_length;
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..to_read])?;
        if n == 0 {
            return Err(IoError::new(
                IoErrorKind::UnexpectedEof,
                format!("content_length({content_length}) is more than the size of the stream"),
            ));
        }
        digest.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(digest.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_hex_sha1_of_bytes() {
        assert_eq!(
            hex_sha1_of_bytes(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(hex_sha1_of_bytes(b"").len(), HEX_SHA1_SIZE);
    }

    #[test]
    fn test_hex_sha1_of_stream() -> IoResult<()> {
        let mut stream = Cursor::new(b"hello world and more".to_vec());
        assert_eq!(
            hex_sha1_of_stream(&mut stream, 11)?,
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        let mut short = Cursor::new(b"abc".to_vec());
        assert!(hex_sha1_of_stream(&mut short, 4).is_err());
        Ok(())
    }
}
