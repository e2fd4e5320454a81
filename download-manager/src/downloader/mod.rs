mod parallel;
mod simple;

pub use parallel::ParallelDownloader;
pub use simple::SimpleDownloader;

/// 下载分块大小的缺省下限
pub const MIN_CHUNK_SIZE: u64 = 8192;

/// 下载分块大小的缺省上限
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// 分块大小的对齐因子
pub const ALIGN_FACTOR: u64 = 4096;

/// 计算下载分块大小
///
/// 取对象长度的千分之一，压到 `[min, max]` 区间内，再向下对齐。
/// 指定了 `force_chunk_size` 时直接使用。
pub fn chunk_size_for(content_length: u64, force_chunk_size: Option<u64>) -> u64 {
    if let Some(force_chunk_size) = force_chunk_size {
        return force_chunk_size.max(1);
    }
    let ideal = (content_length / 1000).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    let aligned = ideal - ideal % ALIGN_FACTOR;
    aligned.max(ALIGN_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_bounds_and_alignment() {
        assert_eq!(chunk_size_for(19, None), MIN_CHUNK_SIZE);
        assert_eq!(chunk_size_for(1000 * MAX_CHUNK_SIZE * 10, None), MAX_CHUNK_SIZE);
        let mid = chunk_size_for(100_000_000, None);
        assert_eq!(mid % ALIGN_FACTOR, 0);
        assert!(mid >= MIN_CHUNK_SIZE && mid <= MAX_CHUNK_SIZE);
        assert_eq!(chunk_size_for(100, Some(2)), 2);
    }
}
