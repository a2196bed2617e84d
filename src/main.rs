//! Silkworm - 函数调用语料批量生成入口
//!
//! 流程：加载配置、按角色构建 LLM 客户端、组装引擎与批量执行器，
//! 生成 N 条对话并写入 JSONL。条数取命令行首个位置参数，缺省用配置。

use std::sync::Arc;

use anyhow::Context;

use silkworm::agents::{AssistantAgent, ToolAgent, UserAgent};
use silkworm::batch::{BatchRunner, ProgressFn};
use silkworm::config::{load_config, AgentOverride, LlmSection};
use silkworm::dialog::DialogEngine;
use silkworm::llm::{create_llm_client, SamplingOptions};
use silkworm::scoring::HeuristicScorer;
use silkworm::sink::JsonlSink;
use silkworm::tools::{demo_pool, StaticToolPool, ToolSource};

/// 角色覆盖项与 [llm] 段合成最终采样参数
fn sampling_for(llm: &LlmSection, overrides: &AgentOverride) -> SamplingOptions {
    SamplingOptions {
        temperature: overrides.temperature.unwrap_or(llm.temperature),
        max_tokens: overrides.max_tokens.unwrap_or(llm.max_tokens),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    silkworm::observability::init();

    let cfg = load_config(None).context("加载配置失败")?;
    let count = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<usize>()
            .with_context(|| format!("非法的生成条数: {arg}"))?,
        None => cfg.batch.count,
    };

    // 三个角色可各自覆盖模型与采样参数
    let user_agent = UserAgent::new(
        create_llm_client(&cfg.llm, cfg.agents.user.model.as_deref()),
        sampling_for(&cfg.llm, &cfg.agents.user),
        cfg.generation.related_probability,
    );
    let assistant_agent = AssistantAgent::new(
        create_llm_client(&cfg.llm, cfg.agents.assistant.model.as_deref()),
        sampling_for(&cfg.llm, &cfg.agents.assistant),
    );
    let tool_agent = ToolAgent::new(
        create_llm_client(&cfg.llm, cfg.agents.tool.model.as_deref()),
        sampling_for(&cfg.llm, &cfg.agents.tool),
        cfg.generation.error_rate,
    );

    let sink = JsonlSink::new(&cfg.output.path)
        .with_context(|| format!("打开输出文件失败: {}", cfg.output.path.display()))?;
    let engine = DialogEngine::new(
        user_agent,
        assistant_agent,
        tool_agent,
        cfg.generation.clone(),
    )
    .context("构建对话引擎失败")?
    .with_scorer(Arc::new(HeuristicScorer))
    .with_sink(Arc::new(sink));

    let pool: Arc<dyn ToolSource> = match &cfg.pool.path {
        Some(path) => Arc::new(
            StaticToolPool::from_json_file(path)
                .with_context(|| format!("加载 API 池失败: {}", path.display()))?,
        ),
        None => Arc::new(demo_pool()),
    };

    let runner = BatchRunner::new(Arc::new(engine), pool, &cfg.batch, &cfg.generation)
        .context("构建批量执行器失败")?;

    let progress: Arc<ProgressFn> = Arc::new(|completed, failed, total| {
        println!("进度 {}/{}（失败 {}）", completed + failed, total, failed);
    });
    let outcomes = runner.run(count, Some(progress)).await;

    let completed = outcomes.iter().filter(|o| o.is_success()).count();
    println!(
        "完成：成功 {} 条，失败 {} 条，输出 {}",
        completed,
        outcomes.len() - completed,
        cfg.output.path.display()
    );
    Ok(())
}
