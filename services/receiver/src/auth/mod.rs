//! 鉴权模块：Ed25519 请求验签、客户端 IP 解析与防重放缓存。

pub(crate) mod client_ip;
pub(crate) mod replay;
pub(crate) mod verify;
