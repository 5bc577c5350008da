//! 配置模块，负责加载JSON配置文件

use crate::ast::PropertySchema;
use crate::datalog_compiler::CompilerConfig;
use crate::schema::StaticSchemaLookup;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认的配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "query_builder.json";

/// 配置加载错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    NotFound(PathBuf),
    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("无法解析JSON配置文件 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 查询构建器的完整配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuilderConfig {
    /// 属性名到 schema 的映射, 属性过滤没有附带 schema 时使用
    pub properties: HashMap<String, PropertySchema>,
    pub compiler: CompilerConfig,
}

impl BuilderConfig {
    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    /// 由配置中的属性表构建 schema 查询
    pub fn schema_lookup(&self) -> StaticSchemaLookup {
        StaticSchemaLookup::new(self.properties.clone())
    }
}
