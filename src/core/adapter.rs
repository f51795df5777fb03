use crate::domain::model::{SourceKind, SourceOutcome, SourceRequest, SourceSettings, SourceStatus};
use crate::domain::ports::Source;
use crate::utils::error::InsightError;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 單一來源的結果。轉接器從不向外拋錯，所有失敗都落在 `Failed`。
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult<T> {
    Ok { value: T, elapsed: Duration },
    Failed { error: String, elapsed: Duration },
}

impl<T> SourceResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Ok { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            SourceResult::Ok { value, .. } => Some(value),
            SourceResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SourceResult::Ok { .. } => None,
            SourceResult::Failed { error, .. } => Some(error),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            SourceResult::Ok { elapsed, .. } | SourceResult::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> SourceResult<U> {
        match self {
            SourceResult::Ok { value, elapsed } => SourceResult::Ok {
                value: f(value),
                elapsed,
            },
            SourceResult::Failed { error, elapsed } => SourceResult::Failed { error, elapsed },
        }
    }

    pub fn status(&self, required: bool) -> SourceStatus {
        SourceStatus {
            status: if self.is_ok() {
                SourceOutcome::Ok
            } else {
                SourceOutcome::Failed
            },
            required,
            elapsed_ms: self.elapsed().as_millis() as u64,
            error: self.error().map(str::to_string),
        }
    }
}

/// 包裝單一外部來源：限時、攔截錯誤與 panic，統一轉成 `SourceResult`
pub struct SourceAdapter<S: ?Sized> {
    source: Arc<S>,
    settings: SourceSettings,
}

impl<S: ?Sized> Clone for SourceAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            settings: self.settings.clone(),
        }
    }
}

impl<S> SourceAdapter<S>
where
    S: Source + ?Sized,
{
    pub fn new(source: Arc<S>, settings: SourceSettings) -> Self {
        Self { source, settings }
    }

    pub fn kind(&self) -> SourceKind {
        self.settings.kind
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    pub fn is_required(&self) -> bool {
        self.settings.required
    }

    pub async fn invoke(&self, request: &SourceRequest) -> SourceResult<S::Output> {
        let kind = self.settings.kind;
        let started = Instant::now();
        tracing::debug!(
            "📡 {} ({}): calling with timeout {:?}",
            kind,
            self.source.name(),
            self.settings.timeout
        );

        let call = AssertUnwindSafe(self.source.fetch(request)).catch_unwind();
        let outcome = match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(panic)) => Err(InsightError::source_failure(
                kind.as_str(),
                format!("source panicked: {}", panic_message(panic.as_ref())),
            )),
            Err(_) => Err(InsightError::SourceTimeout {
                source_name: kind.as_str().to_string(),
                timeout_ms: self.settings.timeout.as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                tracing::info!("✅ {}: completed in {}ms", kind, elapsed.as_millis());
                SourceResult::Ok { value, elapsed }
            }
            Err(e) => {
                if self.settings.required {
                    tracing::error!("❌ {} (required): {} after {}ms", kind, e, elapsed.as_millis());
                } else {
                    tracing::warn!("⚠️ {}: {} after {}ms", kind, e, elapsed.as_millis());
                }
                if e.is_transient() {
                    tracing::debug!("🔁 {}: failure looks transient, a later request may succeed", kind);
                }
                SourceResult::Failed {
                    error: e.to_string(),
                    elapsed,
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
