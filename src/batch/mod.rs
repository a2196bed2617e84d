//! 批量生成
//!
//! 三种执行策略共用同一条单任务路径：sequential 串行调试用，
//! threaded 按信号量限流派生任务，buffered 用流式缓冲并发。单条
//! 失败只记入结果，不中断整批。

pub mod runner;

pub use runner::BatchRunner;

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::dialog::Dialog;
use crate::error::EngineError;

/// 批量执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// 逐条串行
    Sequential,
    /// tokio::spawn + 信号量限流
    Threaded,
    /// buffer_unordered 流式并发
    Buffered,
}

impl FromStr for BatchStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "threaded" => Ok(Self::Threaded),
            "buffered" => Ok(Self::Buffered),
            other => Err(EngineError::Config(format!(
                "未知的批量策略: {other}（可选 sequential / threaded / buffered）"
            ))),
        }
    }
}

/// 单条生成任务的结果
#[derive(Debug)]
pub enum BatchOutcome {
    Success { index: usize, dialog: Box<Dialog> },
    Failed { index: usize, error: String },
}

impl BatchOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Success { index, .. } | Self::Failed { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 进度回调：(已完成, 已失败, 总数)
pub type ProgressFn = dyn Fn(usize, usize, usize) + Send + Sync;

/// 跨任务共享的进度计数
///
/// 计数更新与回调在同一把锁内完成，回调按事件顺序串行触发，
/// 不会看到回退的计数。
pub struct ProgressTracker {
    counts: Mutex<(usize, usize)>,
    total: usize,
    callback: Option<Arc<ProgressFn>>,
}

impl ProgressTracker {
    pub fn new(total: usize, callback: Option<Arc<ProgressFn>>) -> Self {
        Self {
            counts: Mutex::new((0, 0)),
            total,
            callback,
        }
    }

    /// 记一条完成或失败
    pub fn record(&self, success: bool) {
        let Ok(mut counts) = self.counts.lock() else {
            return;
        };
        if success {
            counts.0 += 1;
        } else {
            counts.1 += 1;
        }
        if let Some(callback) = &self.callback {
            callback(counts.0, counts.1, self.total);
        }
    }

    /// (已完成, 已失败) 快照
    pub fn snapshot(&self) -> (usize, usize) {
        self.counts.lock().map(|c| *c).unwrap_or((0, 0))
    }
}
