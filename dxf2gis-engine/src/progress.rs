//! 进度事件通道与取消标记。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use dxf2gis_io::WrittenLayer;
use tracing::trace;

use crate::errors::{Diagnostic, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Scan,
    Resolve,
    Normalize,
    Transform,
    Export,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Scan => "scan",
            Stage::Resolve => "resolve",
            Stage::Normalize => "normalize",
            Stage::Transform => "transform",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    Progress {
        stage: Stage,
        layer: Option<String>,
        entities_processed: usize,
        entities_total: usize,
        message: String,
    },
    Completed {
        written_layers: Vec<WrittenLayer>,
        diagnostics: Vec<Diagnostic>,
    },
    Failed {
        error_kind: ErrorKind,
        message: String,
    },
}

impl ConversionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConversionEvent::Progress { .. })
    }
}

/// 有界事件通道的发送端。通道已满或接收端已关闭时直接丢弃事件，转换本身从不阻塞。
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ConversionEvent>>,
}

impl EventSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<ConversionEvent>) {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// 不投递任何事件。
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 返回事件是否被投递。
    pub fn send(&self, event: ConversionEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("事件通道已满，丢弃进度事件");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// 串行化进度事件，保证 `entities_processed` 单调不减。
#[derive(Debug)]
pub struct ProgressReporter {
    sink: EventSink,
    state: Mutex<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    processed: usize,
    total: usize,
}

impl ProgressReporter {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn set_total(&self, total: usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total = total.max(state.processed);
    }

    /// 累加已处理实体数并发送事件。计数与发送在同一把锁内完成。
    pub fn advance(&self, stage: Stage, layer: Option<&str>, delta: usize, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processed = state.processed.saturating_add(delta);
        if state.processed > state.total {
            state.total = state.processed;
        }
        self.sink.send(ConversionEvent::Progress {
            stage,
            layer: layer.map(str::to_string),
            entities_processed: state.processed,
            entities_total: state.total,
            message: message.into(),
        });
    }

    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        self.advance(stage, None, 0, message);
    }

    pub fn processed(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .processed
    }

    pub fn finish(&self, event: ConversionEvent) {
        debug_assert!(event.is_terminal());
        let _guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.sink.send(event);
    }
}

/// 多线程共享的取消标记，克隆后指向同一标志位。
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
