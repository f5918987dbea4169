//! 上传目标路径解析：path key 映射、文件名字符集与目录穿越校验。
//!
//! 词法校验在读取请求体之前完成；落盘前再做一次物理校验，
//! 防止基目录内的符号链接把写入引到外面。

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// 文件名中禁止出现的字符。
const FORBIDDEN_CHARS: [char; 8] = ['<', '>', ':', '"', '|', '?', '*', '\0'];

/// 路径校验失败原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum PathRejection {
    #[error("未知的路径标识: {0}")]
    UnknownPathKey(String),
    #[error("非法文件名: {0}")]
    InvalidFilename(String),
    #[error("路径越界")]
    PathEscape,
}

/// 已通过词法校验的上传目标。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadTarget {
    pub(crate) path_key: String,
    pub(crate) base_dir: PathBuf,
    /// 清理后的相对路径，统一以 `/` 分隔。
    pub(crate) relative: String,
    pub(crate) full_path: PathBuf,
}

/// 词法清理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CleanPath {
    pub(crate) absolute: bool,
    pub(crate) segments: Vec<String>,
}

impl CleanPath {
    /// 清理后仍残留 `..`（只可能出现在开头）。
    pub(crate) fn climbs_out(&self) -> bool {
        self.segments.iter().any(|segment| segment == "..")
    }
}

/// 按词法清理路径：`/` 与 `\` 都视为分隔符，去掉 `.`、空段，`..` 抵消前一段。
pub(crate) fn clean_lexically(raw: &str) -> CleanPath {
    let absolute = raw.starts_with(['/', '\\']);
    let mut segments: Vec<String> = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..".to_string());
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    CleanPath { absolute, segments }
}

/// 将 path key 与相对路径解析为上传目标。
pub(crate) fn resolve(
    paths: &BTreeMap<String, PathBuf>,
    path_key: &str,
    raw_path: &str,
) -> Result<UploadTarget, PathRejection> {
    let Some(base_dir) = paths.get(path_key) else {
        return Err(PathRejection::UnknownPathKey(path_key.to_string()));
    };

    if raw_path.contains(FORBIDDEN_CHARS) {
        return Err(PathRejection::InvalidFilename(raw_path.to_string()));
    }

    let cleaned = clean_lexically(raw_path);
    if cleaned.absolute || cleaned.segments.is_empty() || cleaned.climbs_out() {
        return Err(PathRejection::InvalidFilename(raw_path.to_string()));
    }
    if cleaned
        .segments
        .iter()
        .any(|segment| segment.starts_with('.'))
    {
        return Err(PathRejection::InvalidFilename(raw_path.to_string()));
    }

    let full_path = cleaned
        .segments
        .iter()
        .fold(base_dir.clone(), |acc, segment| acc.join(segment));
    if !is_strictly_inside(base_dir, &full_path) {
        return Err(PathRejection::PathEscape);
    }

    Ok(UploadTarget {
        path_key: path_key.to_string(),
        base_dir: base_dir.clone(),
        relative: cleaned.segments.join("/"),
        full_path,
    })
}

/// `candidate` 以 `base` 为严格前缀（按路径组件比较）。
pub(crate) fn is_strictly_inside(base: &Path, candidate: &Path) -> bool {
    candidate != base && candidate.starts_with(base)
}

/// 物理越界检查：取 `target` 自身或其最深的已存在祖先，解析符号链接后必须仍在基目录内。
///
/// 基目录尚不存在时没有可被利用的链接，直接放行。
pub(crate) async fn confine_physically(base_dir: &Path, target: &Path) -> io::Result<bool> {
    let canonical_base = match tokio::fs::canonicalize(base_dir).await {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };

    let mut probe = Some(target);
    while let Some(candidate) = probe {
        if tokio::fs::symlink_metadata(candidate).await.is_ok() {
            return match tokio::fs::canonicalize(candidate).await {
                Ok(resolved) => Ok(resolved.starts_with(&canonical_base)),
                // 悬空链接
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(err),
            };
        }
        probe = candidate.parent();
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    };

    use super::{PathRejection, clean_lexically, confine_physically, resolve};

    fn paths() -> BTreeMap<String, PathBuf> {
        BTreeMap::from([("web".to_string(), PathBuf::from("/srv/www"))])
    }

    #[test]
    fn nested_relative_path_is_accepted() {
        let target = resolve(&paths(), "web", "sub/dir/file.txt").expect("resolve");
        assert_eq!(target.full_path, Path::new("/srv/www/sub/dir/file.txt"));
        assert_eq!(target.relative, "sub/dir/file.txt");
        assert_eq!(target.path_key, "web");
    }

    #[test]
    fn redundant_segments_are_cleaned() {
        let target = resolve(&paths(), "web", "a//./b\\c.txt").expect("resolve");
        assert_eq!(target.full_path, Path::new("/srv/www/a/b/c.txt"));
        let target = resolve(&paths(), "web", "a/../b.txt").expect("resolve");
        assert_eq!(target.relative, "b.txt");
    }

    #[test]
    fn traversal_and_absolute_paths_are_rejected() {
        for raw in [
            "../../etc/passwd",
            "/etc/passwd",
            "a/../../b",
            "..",
            "\\windows\\system32",
            "..\\..\\boot.ini",
        ] {
            assert!(
                matches!(
                    resolve(&paths(), "web", raw),
                    Err(PathRejection::InvalidFilename(_))
                ),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn dot_segments_and_forbidden_chars_are_rejected() {
        for raw in [
            ".env",
            "assets/.git/config",
            "a<b.txt",
            "c:/x.txt",
            "what?.txt",
            "star*.txt",
            "pipe|.txt",
            "quote\".txt",
            "nul\0.txt",
            "",
            ".",
            "./",
        ] {
            assert!(
                matches!(
                    resolve(&paths(), "web", raw),
                    Err(PathRejection::InvalidFilename(_))
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_key_is_reported() {
        assert_eq!(
            resolve(&paths(), "api", "a.txt"),
            Err(PathRejection::UnknownPathKey("api".to_string()))
        );
    }

    #[test]
    fn lexical_clean_keeps_leading_parent_refs() {
        let cleaned = clean_lexically("a/../../b");
        assert_eq!(cleaned.segments, vec!["..".to_string(), "b".to_string()]);
        assert!(cleaned.climbs_out());
        let rooted = clean_lexically("/../b");
        assert!(rooted.absolute);
        assert_eq!(rooted.segments, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn missing_base_and_plain_dirs_are_confined() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = tmp.path().join("base");
        assert!(
            confine_physically(&base, &base.join("a/b.txt"))
                .await
                .expect("check")
        );
        std::fs::create_dir_all(base.join("a")).expect("mkdir");
        assert!(
            confine_physically(&base, &base.join("a/new/b.txt"))
                .await
                .expect("check")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_base_is_detected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = tmp.path().join("base");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&base).expect("mkdir base");
        std::fs::create_dir_all(&outside).expect("mkdir outside");
        std::os::unix::fs::symlink(&outside, base.join("link")).expect("symlink");

        assert!(
            !confine_physically(&base, &base.join("link/x.txt"))
                .await
                .expect("check")
        );
        assert!(
            !confine_physically(&base, &base.join("link/deeper/x.txt"))
                .await
                .expect("check")
        );
    }
}
