//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SILKWORM__*` 覆盖（双下划线表示嵌套，
//! 如 `SILKWORM__BATCH__STRATEGY=threaded`）。生成参数的默认值保持稳定，
//! 因为它们直接影响语料的可复现性。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub output: OutputSection,
}

/// [generation] 段：对话结构与随机性
///
/// 随 Dialog.metadata.generation_config 一并落盘，故需要 Serialize。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// 每条对话的子任务数下限 / 上限（未显式指定时在区间内均匀抽样）
    #[serde(default = "default_min_subtasks")]
    pub min_subtasks: usize,
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,
    /// 单个子任务的 ReAct 步数上限
    #[serde(default = "default_max_react_steps")]
    pub max_react_steps: usize,
    /// 步数下限：不足此步数时即使助手未发起调用也继续推进（模拟用户追问）
    #[serde(default = "default_min_forced_steps")]
    pub min_forced_steps: usize,
    /// 每条对话采样的候选 API 数量区间
    #[serde(default = "default_min_apis_per_dialog")]
    pub min_apis_per_dialog: usize,
    #[serde(default = "default_max_apis_per_dialog")]
    pub max_apis_per_dialog: usize,
    /// 后续子任务与此前内容相关的概率
    #[serde(default = "default_related_probability")]
    pub related_probability: f64,
    /// 工具执行注入随机失败的概率
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    /// 工具 Schema 方言：claude / openai
    #[serde(default = "default_dialect")]
    pub dialect: String,
    /// 随机种子；缺省时用系统熵（批内各任务种子为 seed + index）
    pub seed: Option<u64>,
}

fn default_min_subtasks() -> usize {
    1
}

fn default_max_subtasks() -> usize {
    5
}

fn default_max_react_steps() -> usize {
    5
}

fn default_min_forced_steps() -> usize {
    1
}

fn default_min_apis_per_dialog() -> usize {
    2
}

fn default_max_apis_per_dialog() -> usize {
    5
}

fn default_related_probability() -> f64 {
    0.5
}

fn default_error_rate() -> f64 {
    0.2
}

fn default_dialect() -> String {
    "claude".to_string()
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            min_subtasks: default_min_subtasks(),
            max_subtasks: default_max_subtasks(),
            max_react_steps: default_max_react_steps(),
            min_forced_steps: default_min_forced_steps(),
            min_apis_per_dialog: default_min_apis_per_dialog(),
            max_apis_per_dialog: default_max_apis_per_dialog(),
            related_probability: default_related_probability(),
            error_rate: default_error_rate(),
            dialect: default_dialect(),
            seed: None,
        }
    }
}

/// [batch] 段：批量规模、并发策略与超时
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    /// 默认生成条数（命令行位置参数可覆盖）
    #[serde(default = "default_batch_count")]
    pub count: usize,
    /// 同时在飞的生成任务数上限
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
    /// 单个生成任务的超时（秒），仅并发策略生效
    #[serde(default = "default_batch_timeout_secs")]
    pub timeout_secs: u64,
    /// 执行策略：sequential / threaded / buffered
    #[serde(default = "default_batch_strategy")]
    pub strategy: String,
}

fn default_batch_count() -> usize {
    10
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_batch_timeout_secs() -> u64 {
    300
}

fn default_batch_strategy() -> String {
    "buffered".to_string()
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            count: default_batch_count(),
            concurrency: default_batch_concurrency(),
            timeout_secs: default_batch_timeout_secs(),
            strategy: default_batch_strategy(),
        }
    }
}

/// [llm] 段：后端选择、采样参数与重试
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai / claude / mock；API Key 只从环境变量读取
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub retry: RetrySection,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// [llm.retry] 段：仅后端层重试，编排层不再叠加
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// [agents] 段：三个角色各自可覆盖模型与采样参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentsSection {
    #[serde(default)]
    pub user: AgentOverride,
    #[serde(default)]
    pub assistant: AgentOverride,
    #[serde(default)]
    pub tool: AgentOverride,
}

/// 单个角色的覆盖项，缺省继承 [llm] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentOverride {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// [pool] 段：候选 API 池来源，缺省使用内置演示池
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PoolSection {
    /// JSON 文件路径（ToolDefinition 数组）
    pub path: Option<PathBuf>,
}

/// [output] 段：落盘路径
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("data/dialogs.jsonl")
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generation: GenerationSection::default(),
            batch: BatchSection::default(),
            llm: LlmSection::default(),
            agents: AgentsSection::default(),
            pool: PoolSection::default(),
            output: OutputSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SILKWORM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SILKWORM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SILKWORM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_stable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.generation.min_subtasks, 1);
        assert_eq!(cfg.generation.max_subtasks, 5);
        assert_eq!(cfg.generation.max_react_steps, 5);
        assert_eq!(cfg.generation.min_forced_steps, 1);
        assert_eq!(cfg.generation.max_apis_per_dialog, 5);
        assert_eq!(cfg.generation.related_probability, 0.5);
        assert_eq!(cfg.generation.error_rate, 0.2);
        assert_eq!(cfg.generation.dialect, "claude");
        assert_eq!(cfg.batch.concurrency, 4);
        assert_eq!(cfg.batch.timeout_secs, 300);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
    }

    #[test]
    fn test_generation_section_serializes_for_metadata() {
        let section = GenerationSection::default();
        let v = serde_json::to_value(&section).unwrap();
        assert_eq!(v["min_subtasks"], 1);
        assert_eq!(v["dialect"], "claude");
    }
}
