use b2_apis::{
    http_client::{ApiResult, Error},
    utils::{hex_sha1_of_bytes, hex_sha1_of_stream},
};
use once_cell::sync::OnceCell;
use std::{
    fmt::Debug,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

/// 本地上传数据源
///
/// 长度必须已知，数据可以反复打开。
/// 整体内容的 SHA-1 按需计算，算出后缓存复用。
pub trait UploadSource: Debug + Send + Sync {
    /// 数据源总长度
    fn content_length(&self) -> u64;

    /// 打开完整数据流
    fn open(&self) -> ApiResult<Box<dyn Read + Send>>;

    /// 打开数据源的一个切片
    fn open_range(&self, offset: u64, length: u64) -> ApiResult<Box<dyn Read + Send>> {
        let mut reader = self.open()?;
        skip_bytes(&mut reader, offset)?;
        Ok(Box::new(reader.take(length)))
    }

    /// 整体内容的十六进制 SHA-1
    fn content_sha1(&self) -> ApiResult<String>;
}

fn skip_bytes(reader: &mut dyn Read, mut remaining: u64) -> ApiResult<()> {
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..to_read]).map_err(io_error)?;
        if n == 0 {
            return Err(Error::InvalidArgument {
                message: "upload source is shorter than expected".to_owned(),
            });
        }
        remaining -= n as u64;
    }
    Ok(())
}

pub(crate) fn io_error(err: std::io::Error) -> Error {
    Error::InvalidArgument {
        message: format!("cannot read upload source: {err}"),
    }
}

/// 内存字节上传数据源
#[derive(Debug, Clone)]
pub struct UploadSourceBytes {
    data: Arc<[u8]>,
    sha1: OnceCell<String>,
}

impl UploadSourceBytes {
    /// 创建内存字节上传数据源
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            sha1: OnceCell::new(),
        }
    }

    /// 数据内容
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl UploadSource for UploadSourceBytes {
    fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> ApiResult<Box<dyn Read + Send>> {
        Ok(Box::new(ArcCursor {
            data: self.data.to_owned(),
            position: 0,
        }))
    }

    fn open_range(&self, offset: u64, length: u64) -> ApiResult<Box<dyn Read + Send>> {
        Ok(Box::new(ArcCursor {
            data: self.data.to_owned(),
            position: offset as usize,
        }
        .take(length)))
    }

    fn content_sha1(&self) -> ApiResult<String> {
        Ok(self.sha1.get_or_init(|| hex_sha1_of_bytes(&self.data)).to_owned())
    }
}

#[derive(Debug)]
struct ArcCursor {
    data: Arc<[u8]>,
    position: usize,
}

impl Read for ArcCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.data.len().saturating_sub(self.position);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// 本地文件上传数据源
#[derive(Debug)]
pub struct UploadSourceLocalFile {
    path: PathBuf,
    content_length: u64,
    sha1: OnceCell<String>,
}

impl UploadSourceLocalFile {
    /// 创建本地文件上传数据源，立即读取文件长度
    pub fn new(path: impl Into<PathBuf>) -> ApiResult<Self> {
        let path = path.into();
        let content_length = std::fs::metadata(&path).map_err(io_error)?.len();
        Ok(Self {
            path,
            content_length,
            sha1: OnceCell::new(),
        })
    }

    /// 文件路径
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadSource for UploadSourceLocalFile {
    fn content_length(&self) -> u64 {
        self.content_length
    }

    fn open(&self) -> ApiResult<Box<dyn Read + Send>> {
        let file = File::open(&self.path).map_err(io_error)?;
        Ok(Box::new(file))
    }

    fn open_range(&self, offset: u64, length: u64) -> ApiResult<Box<dyn Read + Send>> {
        let mut file = File::open(&self.path).map_err(io_error)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        Ok(Box::new(file.take(length)))
    }

    fn content_sha1(&self) -> ApiResult<String> {
        if let Some(sha1) = self.sha1.get() {
            return Ok(sha1.to_owned());
        }
        let mut reader = self.open()?;
        let sha1 = hex_sha1_of_stream(&mut reader, self.content_length).map_err(io_error)?;
        Ok(self.sha1.get_or_init(|| sha1).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_source_ranges_and_sha1() -> ApiResult<()> {
        let source = UploadSourceBytes::new(b"hello world".to_vec());
        assert_eq!(source.content_length(), 11);
        assert_eq!(source.content_sha1()?, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");

        let mut buf = Vec::new();
        source.open_range(6, 5)?.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"world");
        Ok(())
    }

    #[test]
    fn test_local_file_source() -> ApiResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let source = UploadSourceLocalFile::new(&path)?;
        assert_eq!(source.content_length(), 11);
        assert_eq!(source.content_sha1()?, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        let mut buf = Vec::new();
        source.open_range(0, 5)?.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
        Ok(())
    }
}
