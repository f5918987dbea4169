//! dr-upload CLI 分发：上传、`keygen`、`pubkey`、`ping`、`info`、`version`。

use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use dr_shared_protocol::{KeyPair, public_from_private};
use tracing::info;

use crate::client::{UploadClient, UploadResult};

/// 服务地址环境变量。
const SERVER_ENV: &str = "DEPLOY_SERVER";
/// 私钥环境变量。
const PRIVATE_KEY_ENV: &str = "DEPLOY_PRIVATE_KEY";
/// 未配置时的默认服务地址。
const DEFAULT_SERVER: &str = "http://localhost:8022";

/// 解析后的命令。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Upload(UploadCommand),
    Keygen,
    Pubkey { key: Option<String> },
    Ping { server: Option<String> },
    Info { server: Option<String> },
    Version,
    Help,
}

/// 上传参数。
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct UploadCommand {
    pub(crate) source: PathBuf,
    pub(crate) path_key: String,
    pub(crate) extract: bool,
    pub(crate) server: Option<String>,
    pub(crate) key: Option<String>,
}

/// 解析命令行参数（不含程序名）。
pub(crate) fn parse(args: &[String]) -> anyhow::Result<Command> {
    let Some(first) = args.first().map(|value| value.trim()) else {
        return Ok(Command::Help);
    };
    match first {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "version" | "--version" => Ok(Command::Version),
        "keygen" => Ok(Command::Keygen),
        "pubkey" => Ok(Command::Pubkey {
            key: parse_single_flag(&args[1..], "--key")?,
        }),
        "ping" => Ok(Command::Ping {
            server: parse_single_flag(&args[1..], "--server")?,
        }),
        "info" => Ok(Command::Info {
            server: parse_single_flag(&args[1..], "--server")?,
        }),
        _ => parse_upload(args).map(Command::Upload),
    }
}

/// 解析 `<file|dir> <path_key> [--extract] [--server URL] [--key HEX]`。
fn parse_upload(args: &[String]) -> anyhow::Result<UploadCommand> {
    let mut positionals = Vec::new();
    let mut cmd = UploadCommand::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--extract" => cmd.extract = true,
            "--server" => cmd.server = Some(flag_value(iter.next(), "--server")?),
            "--key" => cmd.key = Some(flag_value(iter.next(), "--key")?),
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            other => positionals.push(other.to_string()),
        }
    }
    let [source, path_key] = positionals.as_slice() else {
        bail!("usage: dr-upload <file|dir> <path_key> [--extract] [--server URL] [--key HEX]");
    };
    cmd.source = PathBuf::from(source);
    cmd.path_key = path_key.trim().to_string();
    if cmd.path_key.is_empty() || cmd.path_key.contains('/') {
        bail!("invalid path key: {path_key:?}");
    }
    Ok(cmd)
}

fn parse_single_flag(args: &[String], flag: &str) -> anyhow::Result<Option<String>> {
    match args {
        [] => Ok(None),
        [name, value] if name == flag => Ok(Some(value.clone())),
        _ => Err(anyhow!("usage: [{flag} VALUE]")),
    }
}

fn flag_value(value: Option<&String>, flag: &str) -> anyhow::Result<String> {
    value
        .cloned()
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

/// 命令行优先，其次环境变量。
fn resolve_server(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var(SERVER_ENV).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string())
}

fn resolve_key(explicit: Option<String>) -> Option<String> {
    explicit
        .or_else(|| std::env::var(PRIVATE_KEY_ENV).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 执行命令；返回 false 表示有上传失败。
pub(crate) async fn execute(command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Help => {
            print_root_help();
            Ok(true)
        }
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(true)
        }
        Command::Keygen => {
            let pair = KeyPair::generate().context("generate key pair")?;
            println!("PRIVATE_KEY={}", pair.private_key_hex());
            println!("PUBLIC_KEY={}", pair.public_key_hex());
            Ok(true)
        }
        Command::Pubkey { key } => {
            let Some(raw) = resolve_key(key) else {
                bail!("no private key; pass --key or set {PRIVATE_KEY_ENV}");
            };
            let bytes = hex::decode(raw.trim()).context("private key is not valid hex")?;
            let public = public_from_private(&bytes).context("derive public key")?;
            println!("{}", hex::encode(public.as_bytes()));
            Ok(true)
        }
        Command::Ping { server } => {
            let client = UploadClient::new(&resolve_server(server), None)?;
            client.test_connection().await?;
            println!("连接成功");
            Ok(true)
        }
        Command::Info { server } => {
            let client = UploadClient::new(&resolve_server(server), None)?;
            let info = client.server_info().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&info).unwrap_or_else(|_| "{}".to_string())
            );
            Ok(true)
        }
        Command::Upload(cmd) => run_upload(cmd).await,
    }
}

async fn run_upload(cmd: UploadCommand) -> anyhow::Result<bool> {
    let server = resolve_server(cmd.server);
    let key = resolve_key(cmd.key);
    if key.is_none() {
        println!("警告: 未配置私钥，将发送未签名请求");
    }
    let client = UploadClient::new(&server, key.as_deref())?;

    let meta = std::fs::metadata(&cmd.source)
        .with_context(|| format!("stat {}", cmd.source.display()))?;
    if meta.is_dir() {
        if cmd.extract {
            println!("提示: --extract 只对单个 zip 文件生效，目录上传将忽略");
        }
        let results = client.upload_dir(&cmd.path_key, &cmd.source).await?;
        let total = results.len();
        let total_bytes: u64 = results.iter().map(|(file, _)| file.size).sum();
        let mut failed = 0usize;
        for (file, result) in &results {
            report(&file.rel_path, result);
            if !result.success {
                failed += 1;
            }
        }
        info!("directory upload finished: {total} files ({total_bytes} bytes), {failed} failed");
        println!("完成: {} 成功, {failed} 失败", total - failed);
        return Ok(failed == 0);
    }

    let result = client
        .upload_file(&cmd.path_key, &cmd.source, cmd.extract)
        .await;
    report(&cmd.source.display().to_string(), &result);
    Ok(result.success)
}

fn report(label: &str, result: &UploadResult) {
    if result.success {
        println!("✓ {label} -> {} ({} bytes)", result.path, result.size);
        if let Some(dir) = result.extract_dir.as_deref().filter(|_| result.extracted) {
            println!("  已解压到: {dir}");
        }
    } else {
        println!(
            "✗ {label}: {}",
            result.error.as_deref().unwrap_or("未知错误")
        );
    }
}

/// 打印 root help。
fn print_root_help() {
    println!("dr-upload usage:");
    println!("  dr-upload <file|dir> <path_key> [--extract] [--server URL] [--key HEX]");
    println!("  dr-upload keygen");
    println!("  dr-upload pubkey [--key HEX]");
    println!("  dr-upload ping [--server URL]");
    println!("  dr-upload info [--server URL]");
    println!("  dr-upload version");
    println!();
    println!("env: {SERVER_ENV} (default {DEFAULT_SERVER}), {PRIVATE_KEY_ENV}");
}
