//! 追加式落盘
//!
//! 一行一条 JSON 对话（JSONL）。写入即刷盘，进程中断最多丢当前一条；
//! 写失败如何上报由调用方决定，已生成的内存结果不受影响。

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::dialog::Dialog;
use crate::error::EngineError;

/// 对话落盘接口
pub trait DialogSink: Send + Sync {
    fn append(&self, dialog: &Dialog) -> Result<(), EngineError>;
}

/// JSONL 文件 sink
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// 建父目录并以追加模式打开目标文件
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::SinkWrite(format!("创建目录 {} 失败: {}", parent.display(), e))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                EngineError::SinkWrite(format!("打开 {} 失败: {}", path.display(), e))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DialogSink for JsonlSink {
    fn append(&self, dialog: &Dialog) -> Result<(), EngineError> {
        let line =
            serde_json::to_string(dialog).map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| EngineError::SinkWrite("sink 互斥锁中毒".to_string()))?;
        writeln!(file, "{}", line).map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        file.flush().map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        Ok(())
    }
}
