//! dr-upload 入口：把本地文件或目录签名上传到 Deploy Receiver。

mod cli;
mod client;

#[tokio::main]
/// 解析命令并执行；有上传失败时以非零状态退出。
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let command = cli::parse(&args)?;
    if !cli::execute(command).await? {
        std::process::exit(1);
    }
    Ok(())
}
