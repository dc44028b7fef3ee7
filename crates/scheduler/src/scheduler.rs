//! 영속 태스크 스케줄러
//!
//! 태스크별 마지막 실행 시각을 [`KvStore`]에 기록하여, 프로세스가 재시작되어도
//! 같은 주기 안에서 중복 실행하거나 한 주기 이상 건너뛰지 않습니다.
//!
//! # 영속 키
//!
//! - `scheduler:{name}:LastExecTime`: 마지막 실행 시각 (epoch 초)
//! - `scheduler:{name}:ExecTimeParams`: 정시 태스크의 마지막 구성 ([`ExactTime`] JSON)
//!
//! # 실행 모델
//!
//! 단일 루프가 `scan_interval`마다 깨어나 등록 순서대로 태스크를 검사하고,
//! due 상태인 태스크를 순차 실행합니다. 느린 태스크는 같은 tick의 다른 태스크 검사를 지연시킵니다.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use proxylog_core::error::StorageError;
use proxylog_core::metrics as m;
use proxylog_core::store::KvStore;

use crate::clock::{Clock, SystemClock};
use crate::error::{SchedulerError, TaskError};
use crate::exact_time::ExactTime;

/// 박싱된 Send future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 스케줄 가능한 작업
///
/// `Fn() -> impl Future<Output = Result<(), TaskError>>` 클로저는 자동으로 구현됩니다.
pub trait TaskAction: Send + Sync {
    fn run(&self) -> BoxFuture<'_, Result<(), TaskError>>;
}

impl<F, Fut> TaskAction for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn run(&self) -> BoxFuture<'_, Result<(), TaskError>> {
        Box::pin(self())
    }
}

/// 마지막 실행 시각 키
pub fn last_exec_key(name: &str) -> String {
    format!("scheduler:{name}:LastExecTime")
}

/// 정시 구성 키
pub fn exec_params_key(name: &str) -> String {
    format!("scheduler:{name}:ExecTimeParams")
}

struct TaskDescriptor {
    name: String,
    interval: Duration,
    action: Box<dyn TaskAction>,
}

/// 영속 태스크 스케줄러
pub struct PersistentTaskScheduler<S, C = SystemClock> {
    store: S,
    clock: C,
    scan_interval: Duration,
    tasks: Vec<TaskDescriptor>,
    cancel: CancellationToken,
}

impl<S: KvStore> PersistentTaskScheduler<S> {
    pub fn new(store: S, scan_interval: Duration) -> Self {
        Self::with_clock(store, SystemClock, scan_interval)
    }
}

impl<S: KvStore, C: Clock> PersistentTaskScheduler<S, C> {
    pub fn with_clock(store: S, clock: C, scan_interval: Duration) -> Self {
        Self {
            store,
            clock,
            scan_interval,
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// 등록된 태스크 이름 (등록 순서)
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    fn register(&mut self, name: &str, interval: Duration, action: Box<dyn TaskAction>) {
        let descriptor = TaskDescriptor {
            name: name.to_owned(),
            interval,
            action,
        };
        match self.tasks.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = descriptor,
            None => self.tasks.push(descriptor),
        }
    }

    /// 주기 태스크를 등록합니다.
    ///
    /// 영속 상태가 없으면 첫 tick에서 바로 실행됩니다.
    pub fn schedule(&mut self, name: &str, interval: Duration, action: impl TaskAction + 'static) {
        self.register(name, interval, Box::new(action));
        debug!(task = name, interval_secs = interval.as_secs(), "interval task registered");
    }

    /// 정시 태스크를 등록합니다.
    ///
    /// 처음 등록되거나 구성이 바뀐 경우, 또는 마지막 실행이 한 주기 이상 뒤처진 경우
    /// 다음 tick에 실행되도록 마지막 실행 시각을 조정합니다. 구성이 같고 이미 실행된
    /// 경우에는 영속 상태를 건드리지 않으므로 재시작만으로 재실행되지 않습니다.
    pub fn schedule_exact_time(
        &mut self,
        name: &str,
        spec: ExactTime,
        action: impl TaskAction + 'static,
    ) -> Result<(), SchedulerError> {
        spec.validate().map_err(|reason| SchedulerError::InvalidTime {
            task: name.to_owned(),
            reason,
        })?;
        let storage = |source: StorageError| SchedulerError::Storage {
            task: name.to_owned(),
            source,
        };

        let params_key = exec_params_key(name);
        let stored = self.store.get_string(&params_key).map_err(storage)?;
        let previous = if stored.is_empty() {
            None
        } else {
            match serde_json::from_str::<ExactTime>(&stored) {
                Ok(previous) => Some(previous),
                Err(e) => {
                    warn!(task = name, error = %e, "stored exec time params unreadable, treating as changed");
                    None
                }
            }
        };
        let changed = previous != Some(spec);

        let interval = spec.interval();
        let interval_secs = crate::exact_time::interval_delta(interval).num_seconds();
        let need_exec = spec.need_exec_time(self.clock.now()).timestamp();

        let last_key = last_exec_key(name);
        let last_exec = self.store.get_int(&last_key).map_err(storage)?;

        if changed || need_exec - last_exec > interval_secs {
            self.store
                .set_int(&last_key, need_exec - interval_secs)
                .map_err(storage)?;
            info!(task = name, changed, "exact-time task armed for next tick");
        }

        if changed {
            let json = serde_json::to_string(&spec).map_err(|e| SchedulerError::Storage {
                task: name.to_owned(),
                source: StorageError::Serialization(e.to_string()),
            })?;
            self.store.set_string(&params_key, &json).map_err(storage)?;
        }

        self.register(name, interval, Box::new(action));
        Ok(())
    }

    /// 한 번의 검사를 수행하고 실행한 태스크 수를 반환합니다.
    ///
    /// 영속 상태를 읽지 못한 태스크는 due가 아닌 것으로 보고 다음 tick에 재시도합니다.
    /// 실행 결과와 관계없이 실행한 태스크의 마지막 실행 시각은 현재 시각으로 갱신됩니다.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now().timestamp();
        let mut executed = 0;

        for task in &self.tasks {
            let key = last_exec_key(&task.name);
            let last_exec = match self.store.get_int(&key) {
                Ok(v) => v,
                Err(e) => {
                    warn!(task = %task.name, error = %e, "can't read last exec time, retrying next tick");
                    continue;
                }
            };

            let interval_secs = crate::exact_time::interval_delta(task.interval).num_seconds();
            if now - last_exec <= interval_secs {
                continue;
            }

            info!(task = %task.name, "executing scheduled task");
            let result = match task.action.run().await {
                Ok(()) => "success",
                Err(e) => {
                    warn!(task = %task.name, error = %e, "scheduled task failed");
                    "failure"
                }
            };
            metrics::counter!(
                m::SCHEDULER_TASK_RUNS_TOTAL,
                m::LABEL_TASK => task.name.clone(),
                m::LABEL_RESULT => result
            )
            .increment(1);
            executed += 1;

            if let Err(e) = self.store.set_int(&key, now) {
                warn!(task = %task.name, error = %e, "can't update last exec time");
            }
        }

        executed
    }

    /// [`stop`](Self::stop)이 호출될 때까지 `scan_interval`마다 [`tick`](Self::tick)을 수행합니다.
    pub async fn run(&self) {
        info!(
            tasks = self.tasks.len(),
            scan_interval_secs = self.scan_interval.as_secs(),
            "scheduler started"
        );
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.scan_interval) => {}
            }
            self.tick().await;
        }
        info!("scheduler finished");
    }

    /// 실행 루프를 멈춥니다. 진행 중인 태스크는 끝까지 실행됩니다.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
