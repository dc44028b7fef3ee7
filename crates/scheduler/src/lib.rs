//! # proxylog-scheduler
//!
//! 주기 태스크와 와일드카드 정시 태스크를 실행하며, 실행 상태를
//! [`KvStore`](proxylog_core::KvStore)에 영속화하여 재시작을 넘어 유지합니다.
//!
//! # 사용 예시
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use proxylog_scheduler::{ExactTime, PersistentTaskScheduler, TaskError};
//! # fn store() -> Arc<dyn proxylog_core::KvStore> { unimplemented!() }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler = PersistentTaskScheduler::new(store(), Duration::from_secs(10));
//! scheduler.schedule("cache-vacuum", Duration::from_secs(3600), || async {
//!     Ok::<(), TaskError>(())
//! });
//! scheduler.schedule_exact_time("report", ExactTime::new(Some(9), Some(0), Some(0)), || async {
//!     Ok::<(), TaskError>(())
//! })?;
//!
//! let scheduler = Arc::new(scheduler);
//! let runner = Arc::clone(&scheduler);
//! let handle = tokio::spawn(async move { runner.run().await });
//! scheduler.stop();
//! handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod exact_time;
pub mod scheduler;

pub use clock::{Clock, SystemClock};
pub use error::{SchedulerError, TaskError};
pub use exact_time::ExactTime;
pub use scheduler::{PersistentTaskScheduler, TaskAction, exec_params_key, last_exec_key};
