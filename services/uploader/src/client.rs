//! 签名上传客户端：单文件、目录逐文件上传，以及健康/信息探测。

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow, bail};
use dr_shared_protocol::{
    ErrorResponse, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, HealthResponse,
    ServiceInfo, UploadResponse, create_signed_headers, signing_key_from_hex, upload_url_path,
};
use ed25519_dalek::SigningKey;
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

/// 上传请求超时。
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// 探测请求超时。
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// 单次上传结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UploadResult {
    pub(crate) success: bool,
    pub(crate) path: String,
    pub(crate) size: u64,
    pub(crate) path_key: String,
    pub(crate) filename: String,
    pub(crate) extracted: bool,
    pub(crate) extract_dir: Option<String>,
    pub(crate) error: Option<String>,
}

impl UploadResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// 目录中待上传的文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileToUpload {
    pub(crate) abs_path: PathBuf,
    /// 相对目录根的路径，`/` 分隔。
    pub(crate) rel_path: String,
    pub(crate) size: u64,
}

/// Receiver 客户端。
pub(crate) struct UploadClient {
    http: reqwest::Client,
    /// 服务地址；路径部分是反向代理挂载前缀，根路径时为 `/`。
    server: Url,
    signing_key: Option<SigningKey>,
}

impl UploadClient {
    /// 构造客户端；私钥为空时发送未签名请求。
    pub(crate) fn new(server: &str, private_key_hex: Option<&str>) -> anyhow::Result<Self> {
        let server = parse_server_url(server)?;
        let signing_key = match private_key_hex.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(signing_key_from_hex(raw).context("invalid private key")?),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .context("build upload client failed")?;
        Ok(Self {
            http,
            server,
            signing_key,
        })
    }

    /// 上传单个文件到 `path_key` 根目录，文件名取本地文件名。
    pub(crate) async fn upload_file(
        &self,
        path_key: &str,
        file_path: &Path,
        extract: bool,
    ) -> UploadResult {
        let Some(name) = file_path.file_name().and_then(|value| value.to_str()) else {
            return UploadResult::failed(format!("无效的文件名: {}", file_path.display()));
        };
        self.upload_file_as(path_key, file_path, name, extract).await
    }

    /// 以指定相对路径上传单个文件。
    pub(crate) async fn upload_file_as(
        &self,
        path_key: &str,
        file_path: &Path,
        rel_path: &str,
        extract: bool,
    ) -> UploadResult {
        match tokio::fs::read(file_path).await {
            Ok(bytes) => self.upload_bytes(path_key, rel_path, bytes, extract).await,
            Err(err) => UploadResult::failed(format!("读取文件失败: {err}")),
        }
    }

    /// 上传目录下全部文件（跳过隐藏文件），保持相对路径。
    pub(crate) async fn upload_dir(
        &self,
        path_key: &str,
        dir: &Path,
    ) -> anyhow::Result<Vec<(FileToUpload, UploadResult)>> {
        let files = list_files(dir)?;
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let result = self
                .upload_file_as(path_key, &file.abs_path, &file.rel_path, false)
                .await;
            results.push((file, result));
        }
        Ok(results)
    }

    /// 发送一次上传请求。签名只覆盖未编码的路径，不含 query。
    pub(crate) async fn upload_bytes(
        &self,
        path_key: &str,
        rel_path: &str,
        bytes: Vec<u8>,
        extract: bool,
    ) -> UploadResult {
        let url_path = upload_url_path(path_key, rel_path);
        let mut url = self.endpoint(&encode_path(&url_path));
        url.set_query(extract.then_some("extract=true"));

        let size = bytes.len();
        let mut request = self
            .http
            .post(url.clone())
            .header("Content-Type", "application/octet-stream")
            .body(bytes);
        if let Some(key) = &self.signing_key {
            match create_signed_headers(key, &url_path) {
                Ok(signed) => {
                    request = request
                        .header(HEADER_TIMESTAMP, signed.timestamp)
                        .header(HEADER_NONCE, signed.nonce)
                        .header(HEADER_SIGNATURE, signed.signature);
                }
                Err(err) => return UploadResult::failed(format!("签名失败: {err}")),
            }
        }

        debug!("uploading {size} bytes to {url}");
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return UploadResult::failed(format!("请求失败: {err}")),
        };
        let status = response.status();
        match response.text().await {
            Ok(body) => interpret_response(status, &body),
            Err(err) => UploadResult::failed(format!("读取响应失败: {err}")),
        }
    }

    /// 请求 `/health`，状态必须为 `ok`。
    pub(crate) async fn test_connection(&self) -> anyhow::Result<()> {
        let url = self.endpoint("/health");
        let resp = self
            .http
            .get(url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("连接失败: {url}"))?;
        if resp.status() != StatusCode::OK {
            bail!("服务器响应异常: {}", resp.status());
        }
        let body: HealthResponse = resp.json().await.context("响应格式错误")?;
        if body.status != "ok" {
            bail!("服务器状态异常: {}", body.status);
        }
        Ok(())
    }

    /// 请求 `/` 获取服务信息。
    pub(crate) async fn server_info(&self) -> anyhow::Result<ServiceInfo> {
        let url = self.endpoint("/");
        let resp = self
            .http
            .get(url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("连接失败: {url}"))?;
        resp.json().await.context("响应格式错误")
    }

    /// 在服务地址前缀后拼接已编码的路径。
    fn endpoint(&self, encoded_path: &str) -> Url {
        let mut url = self.server.clone();
        let prefix = self.server.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{encoded_path}"));
        url
    }
}

/// 解析服务地址，只接受 http/https；保留路径前缀并去掉末尾 `/`。
fn parse_server_url(raw: &str) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(raw.trim()).with_context(|| format!("invalid server url: {raw}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("unsupported server scheme: {other}")),
    }
    let prefix = url.path().trim_end_matches('/').to_string();
    url.set_path(&prefix);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// 逐段百分号编码，保留 `/`。
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 根据状态码与响应体判定上传结果：HTTP 200 且 `status == "ok"` 才算成功。
pub(crate) fn interpret_response(status: StatusCode, body: &str) -> UploadResult {
    if let Ok(ok) = serde_json::from_str::<UploadResponse>(body) {
        let success = status == StatusCode::OK && ok.status == "ok";
        return UploadResult {
            success,
            error: (!success).then(|| format!("上传失败: {}", ok.status)),
            path: ok.path,
            size: ok.size,
            path_key: ok.path_key,
            filename: ok.filename,
            extracted: ok.extracted,
            extract_dir: ok.extract_dir,
        };
    }
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        return UploadResult::failed(format!("{} ({})", err.error, err.code));
    }
    if status.is_client_error() || status.is_server_error() {
        return UploadResult::failed(format!("服务器错误 ({}): {}", status.as_u16(), body));
    }
    UploadResult::failed(format!("解析响应失败, 原始响应: {body}"))
}

/// 递归列出目录中的文件，跳过以 `.` 开头的文件与目录，按相对路径排序。
pub(crate) fn list_files(dir: &Path) -> anyhow::Result<Vec<FileToUpload>> {
    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileToUpload>) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        // 文件链接照常跟随；目录链接与悬空链接跳过
        let meta = match fs::metadata(&path) {
            Ok(meta) if file_type.is_symlink() && meta.is_dir() => {
                warn!("skipping symlinked directory {}", path.display());
                continue;
            }
            Ok(meta) => meta,
            Err(err) if file_type.is_symlink() => {
                warn!("skipping dangling symlink {}: {err}", path.display());
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", path.display()));
            }
        };
        if meta.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("relative path of {}", path.display()))?;
        let rel_path = rel
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push(FileToUpload {
            abs_path: path,
            rel_path,
            size: meta.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use axum::{
        Json, Router,
        body::Bytes,
        http::{HeaderMap, StatusCode, Uri},
        routing::{get, post},
    };
    use dr_shared_protocol::{
        HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, HealthResponse, KeyPair,
        UploadResponse, canonical_message, verify_signature,
    };

    use super::{UploadClient, encode_path, interpret_response, list_files, parse_server_url};

    #[derive(Default)]
    struct Seen {
        uploads: Vec<(String, Option<String>, usize)>,
    }

    async fn spawn_mock(pair: &KeyPair) -> (String, Arc<Mutex<Seen>>) {
        spawn_mock_at(pair, "").await
    }

    /// 本地模拟 receiver：按解码后的路径验签并回显；`prefix` 非空时挂在该前缀下。
    async fn spawn_mock_at(pair: &KeyPair, prefix: &str) -> (String, Arc<Mutex<Seen>>) {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let public_key = pair.public_key();
        let seen_for_route = seen.clone();
        let routes = Router::new()
            .route("/health", get(|| async { Json(HealthResponse::ok()) }))
            .route(
                "/upload/{*rest}",
                post(move |uri: Uri, headers: HeaderMap, body: Bytes| {
                    let seen = seen_for_route.clone();
                    async move {
                        let path = urlencoding::decode(uri.path())
                            .map(|value| value.into_owned())
                            .unwrap_or_default();
                        let header = |name: &str| {
                            headers
                                .get(name)
                                .and_then(|value| value.to_str().ok())
                                .unwrap_or("")
                                .to_string()
                        };
                        let message = canonical_message(
                            &header(HEADER_TIMESTAMP),
                            &header(HEADER_NONCE),
                            &path,
                        );
                        if verify_signature(&public_key, &message, &header(HEADER_SIGNATURE))
                            .is_err()
                        {
                            return (
                                StatusCode::UNAUTHORIZED,
                                Json(serde_json::json!({
                                    "status": "error",
                                    "code": "UNAUTHORIZED",
                                    "error": "认证失败",
                                })),
                            );
                        }
                        if let Ok(mut guard) = seen.lock() {
                            guard.uploads.push((
                                path.clone(),
                                uri.query().map(ToString::to_string),
                                body.len(),
                            ));
                        }
                        let filename = path
                            .splitn(4, '/')
                            .nth(3)
                            .unwrap_or_default()
                            .to_string();
                        let body = UploadResponse {
                            status: "ok".to_string(),
                            path: format!("/srv{path}"),
                            size: body.len() as u64,
                            path_key: "web".to_string(),
                            filename,
                            extracted: false,
                            extract_dir: None,
                        };
                        (
                            StatusCode::OK,
                            Json(serde_json::to_value(body).unwrap_or_default()),
                        )
                    }
                }),
            );
        let app = if prefix.is_empty() {
            routes
        } else {
            Router::new().nest(prefix, routes)
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr: SocketAddr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}{prefix}"), seen)
    }

    #[tokio::test]
    async fn signed_upload_reaches_server_with_query_unsigned() {
        let pair = KeyPair::generate().expect("generate");
        let (server, seen) = spawn_mock(&pair).await;
        let client =
            UploadClient::new(&server, Some(&pair.private_key_hex())).expect("client");

        let result = client
            .upload_bytes("web", "release notes.zip", b"PK".to_vec(), true)
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.filename, "release notes.zip");
        assert_eq!(result.size, 2);

        let guard = seen.lock().expect("lock");
        assert_eq!(
            guard.uploads,
            vec![(
                "/upload/web/release notes.zip".to_string(),
                Some("extract=true".to_string()),
                2
            )]
        );
    }

    #[tokio::test]
    async fn wrong_key_fails_and_health_check_passes() {
        let pair = KeyPair::generate().expect("generate");
        let (server, _) = spawn_mock(&pair).await;
        let other = KeyPair::generate().expect("generate");
        let client =
            UploadClient::new(&server, Some(&other.private_key_hex())).expect("client");

        let result = client.upload_bytes("web", "a.txt", b"x".to_vec(), false).await;
        assert!(!result.success);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|msg| msg.contains("UNAUTHORIZED"))
        );
        client.test_connection().await.expect("health");
    }

    #[tokio::test]
    async fn mounted_server_prefix_is_kept_but_not_signed() {
        let pair = KeyPair::generate().expect("generate");
        let (server, seen) = spawn_mock_at(&pair, "/deploy").await;
        let client = UploadClient::new(&format!("{server}/"), Some(&pair.private_key_hex()))
            .expect("client");

        let result = client.upload_bytes("web", "a.txt", b"x".to_vec(), false).await;
        assert!(result.success, "{result:?}");
        // nest 剥掉前缀后交给路由，验签用的就是剥掉后的 `/upload/...`
        assert_eq!(seen.lock().expect("lock").uploads.len(), 1);
        assert_eq!(seen.lock().expect("lock").uploads[0].0, "/upload/web/a.txt");
        client.test_connection().await.expect("health under prefix");
    }

    #[test]
    fn endpoint_joins_prefix_and_path() {
        let client = UploadClient::new("http://h:1/deploy/?x=1#f", None).expect("client");
        assert_eq!(
            client.endpoint("/upload/web/a%20b.txt").as_str(),
            "http://h:1/deploy/upload/web/a%20b.txt"
        );
        let root = UploadClient::new("http://h:1", None).expect("client");
        assert_eq!(root.endpoint("/health").as_str(), "http://h:1/health");
        assert_eq!(root.endpoint("/").as_str(), "http://h:1/");
        assert!(parse_server_url("ftp://h/").is_err());
    }

    #[tokio::test]
    async fn directory_upload_keeps_relative_paths() {
        let pair = KeyPair::generate().expect("generate");
        let (server, seen) = spawn_mock(&pair).await;
        let client =
            UploadClient::new(&server, Some(&pair.private_key_hex())).expect("client");

        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("assets/js")).expect("mkdir");
        std::fs::create_dir_all(tmp.path().join(".git")).expect("mkdir");
        std::fs::write(tmp.path().join("index.html"), "<html/>").expect("write");
        std::fs::write(tmp.path().join("assets/js/app.js"), "run()").expect("write");
        std::fs::write(tmp.path().join(".env"), "SECRET=1").expect("write");
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").expect("write");

        let results = client.upload_dir("web", tmp.path()).await.expect("upload dir");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, result)| result.success));
        let paths = seen
            .lock()
            .expect("lock")
            .uploads
            .iter()
            .map(|(path, _, _)| path.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "/upload/web/assets/js/app.js".to_string(),
                "/upload/web/index.html".to_string(),
            ]
        );
    }

    #[test]
    fn list_files_skips_hidden_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("b/.cache")).expect("mkdir");
        std::fs::write(tmp.path().join("a.txt"), "1").expect("write");
        std::fs::write(tmp.path().join("b/c.txt"), "22").expect("write");
        std::fs::write(tmp.path().join("b/.cache/x"), "333").expect("write");

        let files = list_files(tmp.path()).expect("list");
        let rels = files
            .iter()
            .map(|file| (file.rel_path.as_str(), file.size))
            .collect::<Vec<_>>();
        assert_eq!(rels, vec![("a.txt", 1), ("b/c.txt", 2)]);
    }

    #[cfg(unix)]
    #[test]
    fn list_files_follows_file_links_and_skips_dir_links() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(outside.path().join("shared")).expect("mkdir");
        std::fs::write(outside.path().join("shared/x.txt"), "x").expect("write");
        std::fs::write(outside.path().join("logo.png"), "png!").expect("write");

        std::fs::write(tmp.path().join("index.html"), "<html/>").expect("write");
        symlink(outside.path().join("shared"), tmp.path().join("shared")).expect("link");
        symlink(outside.path().join("logo.png"), tmp.path().join("logo.png")).expect("link");
        symlink(tmp.path().join("missing"), tmp.path().join("dangling")).expect("link");
        symlink(tmp.path(), tmp.path().join("loop")).expect("link");

        let files = list_files(tmp.path()).expect("list");
        let rels = files
            .iter()
            .map(|file| (file.rel_path.as_str(), file.size))
            .collect::<Vec<_>>();
        assert_eq!(rels, vec![("index.html", 7), ("logo.png", 4)]);
    }

    #[test]
    fn response_interpretation() {
        let ok = r#"{"status":"ok","path":"/srv/a","size":1,"path_key":"web","filename":"a","extracted":false}"#;
        assert!(interpret_response(StatusCode::OK, ok).success);
        assert!(!interpret_response(StatusCode::CREATED, ok).success);

        let err = r#"{"status":"error","code":"PAYLOAD_TOO_LARGE","error":"too big"}"#;
        let result = interpret_response(StatusCode::PAYLOAD_TOO_LARGE, err);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("too big (PAYLOAD_TOO_LARGE)")
        );

        let plain = interpret_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            plain.error.as_deref(),
            Some("服务器错误 (502): upstream down")
        );
    }

    #[test]
    fn path_segments_are_encoded_individually() {
        assert_eq!(
            encode_path("/upload/web/my file%.txt"),
            "/upload/web/my%20file%25.txt"
        );
    }
}
