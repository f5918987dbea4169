//! zip 解压：每个条目都必须落在目标目录之内（zip-slip 防护）。
//!
//! 同步实现，由调用方放进 `spawn_blocking`。中途失败不回滚已写出的条目。

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use zip::{ZipArchive, result::ZipError};

use super::path::{clean_lexically, is_strictly_inside};

/// 解压失败原因。
#[derive(Debug, Error)]
pub(crate) enum ExtractError {
    #[error("打开压缩包失败: {0}")]
    Open(#[source] io::Error),
    #[error("读取压缩包失败: {0}")]
    Archive(#[from] ZipError),
    #[error("非法的压缩包条目路径: {0}")]
    IllegalEntryPath(String),
    #[error("写入解压文件失败 {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 将 `archive` 解压到 `dest_dir`，返回写出的文件数。
pub(crate) fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<usize, ExtractError> {
    let file = File::open(archive).map_err(ExtractError::Open)?;
    let mut zip = ZipArchive::new(file)?;
    create_dir(dest_dir)?;

    let mut written = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_string();
        let is_dir = entry.is_dir();

        let Some(out_path) = entry_output_path(dest_dir, &name) else {
            return Err(ExtractError::IllegalEntryPath(name));
        };
        if out_path == dest_dir {
            if is_dir {
                continue;
            }
            return Err(ExtractError::IllegalEntryPath(name));
        }

        if is_dir {
            create_dir(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            create_dir(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|source| ExtractError::Write {
            path: out_path.clone(),
            source,
        })?;
        io::copy(&mut entry, &mut out).map_err(|source| ExtractError::Write {
            path: out_path.clone(),
            source,
        })?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777)).map_err(
                |source| ExtractError::Write {
                    path: out_path.clone(),
                    source,
                },
            )?;
        }

        written += 1;
    }
    Ok(written)
}

/// 条目落盘路径；越出 `dest_dir` 时返回 `None`，恰好等于 `dest_dir` 时原样返回。
fn entry_output_path(dest_dir: &Path, name: &str) -> Option<PathBuf> {
    let cleaned = clean_lexically(name);
    if cleaned.absolute || cleaned.climbs_out() || name.contains('\0') {
        return None;
    }
    let out = cleaned
        .segments
        .iter()
        .fold(dest_dir.to_path_buf(), |acc, segment| acc.join(segment));
    if out == dest_dir || is_strictly_inside(dest_dir, &out) {
        Some(out)
    } else {
        None
    }
}

fn create_dir(path: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(path).map_err(|source| ExtractError::Write {
        path: path.to_path_buf(),
        source,
    })
}
