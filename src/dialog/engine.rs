//! 对话编排引擎
//!
//! 子任务严格串行：第 i+1 个子任务的用户请求可能引用此前全部轮次。
//! 工具集每条对话只规整一次，同一份规整结果贯穿所有 ReAct 步；评分器
//! 与落盘 sink 均为可选挂件，不改变生成语义。

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::agents::{AssistantAgent, ToolAgent, UserAgent};
use crate::config::GenerationSection;
use crate::dialog::subtask::SubtaskRunner;
use crate::dialog::types::{
    content_hash_id, count_react_steps, count_tool_calls, Dialog, DialogMetadata, SubtaskRecord,
    Turn,
};
use crate::error::EngineError;
use crate::schema::{normalize, Dialect};
use crate::scoring::ComplexityScorer;
use crate::sink::DialogSink;
use crate::tools::ToolDefinition;

/// 成品对话的类型标签
const DIALOG_TYPE: &str = "multi_subtask";

/// 对话引擎
pub struct DialogEngine {
    user: UserAgent,
    assistant: AssistantAgent,
    tool: ToolAgent,
    generation: GenerationSection,
    dialect: Dialect,
    scorer: Option<Arc<dyn ComplexityScorer>>,
    sink: Option<Arc<dyn DialogSink>>,
}

impl DialogEngine {
    /// 构建引擎并校验生成参数；方言不受支持在这里就失败
    pub fn new(
        user: UserAgent,
        assistant: AssistantAgent,
        tool: ToolAgent,
        generation: GenerationSection,
    ) -> Result<Self, EngineError> {
        let dialect = generation.dialect.parse::<Dialect>()?;
        if generation.min_subtasks == 0 || generation.min_subtasks > generation.max_subtasks {
            return Err(EngineError::Config(format!(
                "非法的子任务数范围: {}..={}",
                generation.min_subtasks, generation.max_subtasks
            )));
        }
        if generation.max_react_steps == 0 {
            return Err(EngineError::Config("max_react_steps 不能为 0".to_string()));
        }
        Ok(Self {
            user,
            assistant,
            tool,
            generation,
            dialect,
            scorer: None,
            sink: None,
        })
    }

    /// 挂上复杂度评分器，结果写进 metadata.complexity_score
    pub fn with_scorer(mut self, scorer: Arc<dyn ComplexityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// 挂上落盘 sink；写失败只告警，不影响已生成的内存结果
    pub fn with_sink(mut self, sink: Arc<dyn DialogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 生成一条多子任务对话
    ///
    /// num_subtasks 为 None 时在配置区间内随机；rng 由调用方派生，
    /// 同一 seed 下整条对话的采样序列可复现。
    pub async fn generate(
        &self,
        definitions: &[ToolDefinition],
        num_subtasks: Option<usize>,
        rng: &mut StdRng,
    ) -> Result<Dialog, EngineError> {
        let num_subtasks = num_subtasks.unwrap_or_else(|| {
            rng.gen_range(self.generation.min_subtasks..=self.generation.max_subtasks)
        });

        let tools = normalize(definitions, self.dialect);
        tracing::info!(num_subtasks, tools = tools.len(), "开始生成对话");

        let runner = SubtaskRunner {
            assistant: &self.assistant,
            tool: &self.tool,
            max_react_steps: self.generation.max_react_steps,
            min_forced_steps: self.generation.min_forced_steps,
        };

        let mut global_conversation: Vec<Turn> = Vec::new();
        let mut subtask_breakdown = Vec::with_capacity(num_subtasks);

        for subtask_idx in 0..num_subtasks {
            let query = self
                .user
                .next_query(subtask_idx, &global_conversation, &tools, rng)
                .await?;
            tracing::debug!(subtask_idx, query = %query, "子任务开场");

            let subtask_turns = runner.run(query, &tools, rng).await?;

            subtask_breakdown.push(SubtaskRecord {
                subtask_id: subtask_idx,
                turns: subtask_turns.len(),
                react_steps: count_react_steps(&subtask_turns),
                tool_calls_used: count_tool_calls(&subtask_turns),
            });
            global_conversation.extend(subtask_turns);
        }

        let mut dialog = Dialog {
            dialog_id: content_hash_id(&global_conversation),
            dialog_type: DIALOG_TYPE.to_string(),
            api_candidates: tools.iter().map(|t| t.wire.clone()).collect(),
            metadata: DialogMetadata {
                num_subtasks,
                total_turns: global_conversation.len(),
                subtask_breakdown,
                generation_config: self.generation.clone(),
                complexity_score: None,
            },
            global_conversation,
        };

        if let Some(scorer) = &self.scorer {
            dialog.metadata.complexity_score = Some(scorer.score(&dialog));
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&dialog) {
                tracing::warn!(error = %e, "对话落盘失败，仍返回内存结果");
            }
        }

        tracing::info!(
            dialog_id = %dialog.dialog_id,
            total_turns = dialog.metadata.total_turns,
            "对话生成完成"
        );
        Ok(dialog)
    }
}
