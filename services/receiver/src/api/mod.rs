//! HTTP 接口层：错误映射与统一失败响应。

pub(crate) mod error;
