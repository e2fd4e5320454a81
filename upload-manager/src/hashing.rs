use b2_apis::utils::HEX_SHA1_SIZE;
use digest::Digest;
use sha1::Sha1;
use std::{
    io::{Cursor, Read, Result as IoResult},
    sync::{Arc, Mutex},
};

/// 边读边哈希的数据流
///
/// 读完内部数据流后，把十六进制 SHA-1 作为最后 40 个字节继续吐出，
/// 实现上传协议的"哈希后置"变体。算出的摘要同时写入共享的结果槽，
/// 供上传方与服务端返回的校验和比对。
#[derive(Debug)]
pub struct StreamWithHash<R> {
    inner: R,
    digest: Option<Sha1>,
    tail: Option<Cursor<Vec<u8>>>,
    sink: Option<Arc<Mutex<Option<String>>>>,
}

impl<R> StreamWithHash<R> {
    /// 创建边读边哈希的数据流
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            digest: Some(Sha1::new()),
            tail: None,
            sink: None,
        }
    }

    /// 创建边读边哈希的数据流，摘要算出后写入共享的结果槽
    pub fn with_sink(inner: R, sink: Arc<Mutex<Option<String>>>) -> Self {
        Self {
            inner,
            digest: Some(Sha1::new()),
            tail: None,
            sink: Some(sink),
        }
    }

}

/// 含后置哈希的总长度
#[inline]
pub fn length_with_hash(content_length: u64) -> u64 {
    content_length + HEX_SHA1_SIZE as u64
}

impl<R: Read> Read for StreamWithHash<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(tail) = &mut self.tail {
            return tail.read(buf);
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            if let Some(digest) = &mut self.digest {
                digest.update(&buf[..n]);
            }
            return Ok(n);
        }
        let digest = self.digest.take().expect("hash already finalized");
        let hex_digest = hex::encode(digest.finalize());
        if let Some(sink) = &self.sink {
            *sink.lock().unwrap() = Some(hex_digest.to_owned());
        }
        self.tail = Some(Cursor::new(hex_digest.into_bytes()));
        self.tail.as_mut().unwrap().read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_appended() -> IoResult<()> {
        let sink = Arc::new(Mutex::new(None));
        let mut stream = StreamWithHash::with_sink(&b"hello world"[..], sink.to_owned());
        let mut output = Vec::new();
        stream.read_to_end(&mut output)?;
        assert_eq!(
            output,
            b"hello world2aae6c35c94fcfb415dbe95f408b9ce91ee846ed".to_vec()
        );
        assert_eq!(
            sink.lock().unwrap().as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        assert_eq!(length_with_hash(11), 51);
        Ok(())
    }

    #[test]
    fn test_empty_stream_hash() -> IoResult<()> {
        let mut stream = StreamWithHash::new(&b""[..]);
        let mut output = Vec::new();
        stream.read_to_end(&mut output)?;
        assert_eq!(output.len(), HEX_SHA1_SIZE);
        assert_eq!(output, b"da39a3ee5e6b4b0d3255bfef95601890afd80709".to_vec());
        Ok(())
    }
}
