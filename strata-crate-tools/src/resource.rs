use std::path::{Path, PathBuf};

/// 统一路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = StrataPath::config_path("strata.toml"); // <workspace>/strata.toml
/// ```
pub struct StrataPath {}
impl StrataPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // 本 crate 位于工作区根目录下一级
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }

    /// 工作区根目录下的配置文件
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_under_workspace() {
        let path = StrataPath::config_path("strata.toml");
        assert!(path.starts_with(StrataPath::workspace_path()));
        assert_eq!(path.file_name().and_then(|f| f.to_str()), Some("strata.toml"));
    }

    #[test]
    fn test_workspace_contains_tools_crate() {
        // 工作区根目录下应该能找到本 crate
        let tools_dir = StrataPath::workspace_path().join("strata-crate-tools");
        assert!(tools_dir.join("Cargo.toml").exists());
    }
}
