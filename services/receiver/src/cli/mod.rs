//! receiver CLI 分发：`run`、`console`、`genkey`、`doctor`、`version`。

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use dr_shared_protocol::KeyPair;
use serde_json::json;

use crate::config::{self, Settings};

/// 私钥文件名。
const KEYS_FILE_NAME: &str = "keys.txt";

/// CLI 分发结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CliDispatch {
    /// 继续进入服务主循环。
    Run(RunMode),
    /// 命令已处理完成，主程序应退出。
    Exit,
}

/// 服务启动方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// 直接监听。
    Service,
    /// 先打印配置摘要再监听。
    Console,
}

/// 解析并执行 receiver CLI。
pub(crate) fn dispatch(args: &[String]) -> anyhow::Result<CliDispatch> {
    let Some(cmd) = args.first().map(|value| value.trim()) else {
        return Ok(CliDispatch::Run(RunMode::Service));
    };
    if cmd.is_empty() || cmd == "run" {
        return Ok(CliDispatch::Run(RunMode::Service));
    }

    if matches!(cmd, "-h" | "--help" | "help") {
        print_root_help();
        return Ok(CliDispatch::Exit);
    }

    match cmd {
        "console" => Ok(CliDispatch::Run(RunMode::Console)),
        "genkey" => {
            run_genkey(&config::exe_dir())?;
            Ok(CliDispatch::Exit)
        }
        "doctor" => {
            let format = parse_doctor_format(&args[1..])?;
            if !run_doctor(format, &config::config_path()) {
                std::process::exit(1);
            }
            Ok(CliDispatch::Exit)
        }
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(CliDispatch::Exit)
        }
        other => Err(anyhow!(
            "unknown command: {other}; run `dr-receiver --help` for usage"
        )),
    }
}

/// `doctor` 输出格式。
#[derive(Debug, PartialEq, Eq)]
enum DoctorFormat {
    Text,
    Json,
}

/// 解析 doctor 的 `--format` 参数。
fn parse_doctor_format(args: &[String]) -> anyhow::Result<DoctorFormat> {
    if args.is_empty() {
        return Ok(DoctorFormat::Text);
    }
    if args.len() == 2 && args[0] == "--format" {
        return match args[1].as_str() {
            "text" => Ok(DoctorFormat::Text),
            "json" => Ok(DoctorFormat::Json),
            other => Err(anyhow!("unsupported doctor format: {other}")),
        };
    }
    Err(anyhow!("usage: dr-receiver doctor [--format text|json]"))
}

/// 打印配置健康度；配置无效时返回 false。
fn run_doctor(format: DoctorFormat, path: &Path) -> bool {
    let loaded = Settings::load(path);
    match format {
        DoctorFormat::Text => {
            println!("config-path: {}", path.display());
            match &loaded {
                Ok(settings) => {
                    println!("config-valid: yes");
                    println!("port: {}", settings.port);
                    println!(
                        "security: {}",
                        if settings.security.enabled { "enabled" } else { "disabled" }
                    );
                    println!("timestamp-limit: {}s", settings.security.timestamp_limit);
                    println!("max-upload: {} MB", settings.max_upload_mb);
                    println!("replay-cache: {}", settings.security.replay_cache);
                    println!("log-dir: {}", settings.log_dir.display());
                    for (key, dir) in &settings.paths {
                        println!(
                            "path {key}: {} ({})",
                            dir.display(),
                            if dir.is_dir() { "exists" } else { "missing" }
                        );
                    }
                }
                Err(err) => {
                    println!("config-valid: no");
                    println!("error: {err:#}");
                }
            }
        }
        DoctorFormat::Json => {
            let payload = match &loaded {
                Ok(settings) => json!({
                    "configPath": path.display().to_string(),
                    "configValid": true,
                    "port": settings.port,
                    "securityEnabled": settings.security.enabled,
                    "timestampLimit": settings.security.timestamp_limit,
                    "maxUploadMb": settings.max_upload_mb,
                    "replayCache": settings.security.replay_cache,
                    "logDir": settings.log_dir.display().to_string(),
                    "paths": settings
                        .paths
                        .iter()
                        .map(|(key, dir)| json!({
                            "key": key,
                            "dir": dir.display().to_string(),
                            "exists": dir.is_dir(),
                        }))
                        .collect::<Vec<_>>(),
                }),
                Err(err) => json!({
                    "configPath": path.display().to_string(),
                    "configValid": false,
                    "error": format!("{err:#}"),
                }),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
            );
        }
    }
    loaded.is_ok()
}

/// 生成密钥对并写入 `keys.txt`。
fn run_genkey(dir: &Path) -> anyhow::Result<()> {
    let pair = KeyPair::generate().context("generate key pair")?;
    let private_hex = pair.private_key_hex();
    let public_hex = pair.public_key_hex();

    println!("========================================");
    println!("  Ed25519 密钥对已生成");
    println!("========================================");
    println!();
    println!("私钥 (客户端使用，请妥善保管):");
    println!("{private_hex}");
    println!();
    println!("公钥 (服务端 config.json 中 security.public_key):");
    println!("{public_hex}");
    println!();

    let path = write_keys_file(dir, &private_hex, &public_hex)?;
    println!("密钥已保存到: {}", path.display());
    println!("注意: 私钥只应保存在客户端，不要上传到服务器");
    Ok(())
}

/// 写入密钥文件；Unix 下权限为 0600。
fn write_keys_file(dir: &Path, private_hex: &str, public_hex: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(KEYS_FILE_NAME);
    let content = format!(
        "# Ed25519 Key Pair\n# 私钥 (客户端使用)\nPRIVATE_KEY={private_hex}\n\n# 公钥 (服务端使用)\nPUBLIC_KEY={public_hex}\n"
    );
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(path)
}

/// console 模式启动前打印配置摘要。
pub(crate) fn print_console_summary(settings: &Settings, config_path: &Path) {
    println!("========================================");
    println!("  Deploy Receiver v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("配置文件: {}", config_path.display());
    println!("监听端口: {}", settings.port);
    if settings.security.enabled {
        println!("安全认证: 已启用 (Ed25519)");
        println!("时间窗口: {} 秒", settings.security.timestamp_limit);
        if !settings.security.allowed_ips.is_empty() {
            println!("IP白名单: {}", settings.security.allowed_ips.join(", "));
        }
        if settings.security.replay_cache {
            println!("防重放缓存: 已启用");
        }
    } else {
        println!("安全认证: 未启用 (警告: 任何人都可以上传!)");
    }
    println!("上传上限: {} MB", settings.max_upload_mb);
    println!("路径映射:");
    for (key, dir) in &settings.paths {
        println!("  {key} -> {}", dir.display());
    }
    println!("========================================");
}

/// 打印 root help。
fn print_root_help() {
    println!("dr-receiver usage:");
    println!("  dr-receiver run");
    println!("  dr-receiver console");
    println!("  dr-receiver genkey");
    println!("  dr-receiver doctor [--format text|json]");
    println!("  dr-receiver version");
}
