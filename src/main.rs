use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use silent_bridge::{Config, Engine, FileInfo, LoginInfo, Session};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber as logger;
use tracing_subscriber::EnvFilter;

/// 通过统一接口操作本地磁盘、WebDAV、GitHub、Dropbox、FTP 与 SFTP 上的文件
///
/// 凭据从环境变量读取: GITHUB_TOKEN、DROPBOX_TOKEN、WEBDAV_URL、FTP_URL、SFTP_URL
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// 配置文件路径，默认读取 ./config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// 列出已启用的连接器
    Connectors,
    /// 连接器信息与登录状态
    Info { connector: String },
    /// 列出目录
    Ls {
        connector: String,
        #[arg(default_value = "/")]
        path: String,
    },
    /// 查看文件信息
    Stat { connector: String, path: String },
    /// 创建目录
    Mkdir { connector: String, path: String },
    /// 输出文件内容
    Cat { connector: String, path: String },
    /// 上传本地文件
    Put {
        connector: String,
        local: PathBuf,
        remote: String,
    },
    /// 移动或重命名
    Mv {
        connector: String,
        src: String,
        dest: String,
    },
    /// 删除文件
    Rm { connector: String, path: String },
    /// 删除目录
    Rmdir { connector: String, path: String },
}

impl Command {
    fn connector(&self) -> Option<&str> {
        match self {
            Command::Connectors => None,
            Command::Info { connector }
            | Command::Ls { connector, .. }
            | Command::Stat { connector, .. }
            | Command::Mkdir { connector, .. }
            | Command::Cat { connector, .. }
            | Command::Put { connector, .. }
            | Command::Mv { connector, .. }
            | Command::Rm { connector, .. }
            | Command::Rmdir { connector, .. } => Some(connector),
        }
    }
}

/// 用环境变量中的凭据登录选定的连接器
async fn login_from_env(engine: &Engine, session: &mut Session, connector: &str) -> anyhow::Result<()> {
    let name = connector.to_lowercase();
    let token_var = match name.as_str() {
        "github" => Some("GITHUB_TOKEN"),
        "dropbox" => Some("DROPBOX_TOKEN"),
        _ => None,
    };
    if let Some(var) = token_var {
        if let Ok(token) = std::env::var(var) {
            engine.set_access_token(session, connector, &token).await?;
        }
        return Ok(());
    }

    let url_var = match name.as_str() {
        "webdav" => "WEBDAV_URL",
        "ftp" => "FTP_URL",
        "sftp" => "SFTP_URL",
        _ => return Ok(()),
    };
    if let Ok(url) = std::env::var(url_var) {
        engine
            .login(session, connector, LoginInfo::parse(&url)?)
            .await?;
    }
    Ok(())
}

fn print_entry(info: &FileInfo) {
    let modified = info
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16));
    println!(
        "{} {:>12} {} {}",
        if info.is_dir { 'd' } else { '-' },
        info.size,
        modified,
        info.name
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志输出到 stderr，避免和 cat 的输出混在一起
    logger::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load(),
    };
    debug!("配置加载完成: {:?}", config);

    let engine = Engine::from_config(&config)?;
    let mut session = Session::new();
    if let Some(connector) = cli.command.connector() {
        login_from_env(&engine, &mut session, connector).await?;
    }

    match cli.command {
        Command::Connectors => {
            for name in engine.registry().names() {
                println!("{}", name);
            }
        }
        Command::Info { connector } => {
            let info = engine.get_infos(&mut session, &connector)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Ls { connector, path } => {
            for entry in engine.readdir(&mut session, &connector, &path).await? {
                print_entry(&entry);
            }
        }
        Command::Stat { connector, path } => {
            let info = engine.stat(&mut session, &connector, &path).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Mkdir { connector, path } => {
            engine.mkdir(&mut session, &connector, &path).await?;
        }
        Command::Cat { connector, path } => {
            let mut stream = engine
                .create_read_stream(&mut session, &connector, &path)
                .await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Command::Put {
            connector,
            local,
            remote,
        } => {
            let content = tokio::fs::read(&local)
                .await
                .with_context(|| format!("无法读取本地文件 {}", local.display()))?;
            let size = content.len();
            engine.write_file(&mut session, &connector, &remote, content).await?;
            info!("已上传 {} -> {} ({} 字节)", local.display(), remote, size);
        }
        Command::Mv {
            connector,
            src,
            dest,
        } => {
            engine.rename(&mut session, &connector, &src, &dest).await?;
        }
        Command::Rm { connector, path } => {
            engine.unlink(&mut session, &connector, &path).await?;
        }
        Command::Rmdir { connector, path } => {
            engine.rmdir(&mut session, &connector, &path).await?;
        }
    }
    Ok(())
}
