use b2_apis::{
    http::ResponseBody,
    http_client::{ApiResult, Error},
    utils::ProgressListener,
};
use digest::Digest;
use sha1::Sha1;
use std::{
    io::{Read, Write},
    sync::Arc,
};

/// 顺序下载器
///
/// 把响应体按分块顺序读出并写入目标，适用于不可随机写的目标
/// 或太小而不值得并行的对象。
#[derive(Debug)]
pub struct SimpleDownloader {
    chunk_size: u64,
    check_hash: bool,
}

impl SimpleDownloader {
    /// 创建顺序下载器
    pub fn new(chunk_size: u64, check_hash: bool) -> Self {
        Self {
            chunk_size,
            check_hash,
        }
    }

    /// 执行下载，返回写入的字节数与整体内容的十六进制 SHA-1
    pub fn download(
        &self,
        writer: &mut dyn Write,
        mut body: ResponseBody,
        progress: Arc<dyn ProgressListener>,
    ) -> ApiResult<(u64, Option<String>)> {
        let mut digest = self.check_hash.then(Sha1::new);
        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut bytes_written = 0u64;
        loop {
            let n = body.read(&mut buf).map_err(read_error)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(write_error)?;
            if let Some(digest) = &mut digest {
                digest.update(&buf[..n]);
            }
            bytes_written += n as u64;
            progress.report(bytes_written);
        }
        Ok((bytes_written, digest.map(|digest| hex::encode(digest.finalize()))))
    }
}

pub(crate) fn read_error(err: std::io::Error) -> Error {
    b2_apis::http::ResponseError::builder(b2_apis::http::ResponseErrorKind::ConnectionReset, err)
        .build()
        .into()
}

pub(crate) fn write_error(err: std::io::Error) -> Error {
    Error::InvalidArgument {
        message: format!("cannot write to download destination: {err}"),
    }
}
