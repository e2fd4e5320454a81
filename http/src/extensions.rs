use std::time::Duration;

/// 请求超时扩展
///
/// 放入请求的扩展字段，为单个请求设置整体超时时间。
/// 连接超时与读取超时的缺省值由各传输实现自行配置。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeoutExtension(Duration);

impl TimeoutExtension {
    /// 创建请求超时扩展
    #[inline]
    pub const fn new(timeout: Duration) -> Self {
        Self(timeout)
    }

    /// 获取超时时间
    #[inline]
    pub const fn get(&self) -> Duration {
        self.0
    }
}
