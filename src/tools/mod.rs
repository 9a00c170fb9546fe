//! 工具解析层
//!
//! 编排器只记录工具 ID，下发外部程序前经 ToolResolver 解析成
//! 实际工具名与可选的 MCP 配置路径。默认实现为静态直通；
//! 接入动态注册中心时换一个实现即可，编排器无需改动。

use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::ClientError;

/// 解析结果：下发给外部程序的工具面
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTools {
    /// 传给 --allowedTools 的工具名
    pub allowed_tool_names: Vec<String>,
    /// 传给 --mcp-config 的配置文件路径
    pub mcp_config_path: Option<PathBuf>,
}

/// 工具 ID → 工具面 的解析接口
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, tool_ids: &[String]) -> Result<ResolvedTools, ClientError>;
}

/// 静态解析器：ID 即名称，MCP 配置固定
#[derive(Debug, Clone, Default)]
pub struct StaticToolResolver {
    mcp_config_path: Option<PathBuf>,
}

impl StaticToolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mcp_config(path: impl Into<PathBuf>) -> Self {
        Self {
            mcp_config_path: Some(path.into()),
        }
    }
}

#[async_trait]
impl ToolResolver for StaticToolResolver {
    async fn resolve(&self, tool_ids: &[String]) -> Result<ResolvedTools, ClientError> {
        Ok(ResolvedTools {
            allowed_tool_names: tool_ids.to_vec(),
            mcp_config_path: self.mcp_config_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_passes_ids_through() {
        let resolver = StaticToolResolver::new();
        let resolved = resolver
            .resolve(&["Bash".to_string(), "Edit".to_string()])
            .await
            .unwrap();
        assert_eq!(resolved.allowed_tool_names, vec!["Bash", "Edit"]);
        assert!(resolved.mcp_config_path.is_none());
    }

    #[tokio::test]
    async fn static_resolver_carries_fixed_mcp_config() {
        let resolver = StaticToolResolver::with_mcp_config("/tmp/mcp.json");
        let resolved = resolver.resolve(&[]).await.unwrap();
        assert_eq!(
            resolved.mcp_config_path,
            Some(PathBuf::from("/tmp/mcp.json"))
        );
    }
}
