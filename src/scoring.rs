//! 复杂度评估
//!
//! 纯启发式：候选 API 数、实际用到的 API 数、用户请求与 API 描述的
//! 词面不相似度、调用参数复杂度、对话长度加权求和，上限 1.0。评分
//! 只读成品对话，挂不挂都不影响生成语义。

use std::collections::HashSet;

use serde_json::Value;

use crate::dialog::{Dialog, Turn};

/// 对话复杂度评分，范围 [0, 1]
pub trait ComplexityScorer: Send + Sync {
    fn score(&self, dialog: &Dialog) -> f64;
}

/// 启发式评分器
#[derive(Debug, Default)]
pub struct HeuristicScorer;

impl ComplexityScorer for HeuristicScorer {
    fn score(&self, dialog: &Dialog) -> f64 {
        let num_candidates = dialog.api_candidates.len() as f64;
        let num_used = used_api_count(dialog) as f64;
        let dissimilarity = query_api_dissimilarity(dialog);
        let param_complexity = parameter_complexity(dialog);
        let dialog_length = dialog.global_conversation.len() as f64;

        let score = num_candidates * 0.1
            + num_used * 0.2
            + dissimilarity * 0.3
            + param_complexity * 0.2
            + (dialog_length * 0.1).min(0.2);
        score.min(1.0)
    }
}

fn used_api_count(dialog: &Dialog) -> usize {
    let mut used = HashSet::new();
    for turn in &dialog.global_conversation {
        if let Turn::Assistant { function_calls, .. } = turn {
            for call in function_calls {
                used.insert(call.name.as_str());
            }
        }
    }
    used.len()
}

/// 用户请求与 API 名称加描述之间的平均词面不相似度（1 - Jaccard）
fn query_api_dissimilarity(dialog: &Dialog) -> f64 {
    if dialog.global_conversation.is_empty() || dialog.api_candidates.is_empty() {
        return 0.0;
    }

    let query_text = dialog
        .global_conversation
        .iter()
        .filter_map(|turn| match turn {
            Turn::User { content } => Some(content.to_lowercase()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");
    if query_text.is_empty() {
        return 0.0;
    }
    let query_words: HashSet<&str> = query_text.split_whitespace().collect();

    let mut similarities = Vec::new();
    for api in &dialog.api_candidates {
        let name = api["name"].as_str().unwrap_or("").to_lowercase();
        let desc = api["description"].as_str().unwrap_or("").to_lowercase();
        let api_text = format!("{} {}", name, desc);
        let api_words: HashSet<&str> = api_text.split_whitespace().collect();

        if !query_words.is_empty() && !api_words.is_empty() {
            let overlap = query_words.intersection(&api_words).count() as f64;
            let union = query_words.union(&api_words).count() as f64;
            similarities.push(overlap / union);
        }
    }

    if similarities.is_empty() {
        0.5
    } else {
        1.0 - similarities.iter().sum::<f64>() / similarities.len() as f64
    }
}

/// 调用参数复杂度：参数个数与嵌套（对象/数组）取值的加权
fn parameter_complexity(dialog: &Dialog) -> f64 {
    let mut total_params = 0usize;
    let mut complex_values = 0usize;

    for turn in &dialog.global_conversation {
        if let Turn::Assistant { function_calls, .. } = turn {
            for call in function_calls {
                if let Value::Object(params) = &call.parameters {
                    total_params += params.len();
                    complex_values += params
                        .values()
                        .filter(|v| v.is_object() || v.is_array())
                        .count();
                }
            }
        }
    }

    if total_params == 0 {
        return 0.0;
    }
    (total_params as f64 * 0.1 + complex_values as f64 * 0.2).min(1.0)
}
