//! 上传链路：路径解析、请求处理流水线与 zip 解压。

pub(crate) mod extract;
pub(crate) mod handlers;
pub(crate) mod path;
pub(crate) mod pipeline;
