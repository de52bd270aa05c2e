//! Progress driver strategies.
//!
//! Every worker runs one driver task. In blocking mode the driver
//! suspends on the worker's wakeup primitive and calls `progress()` only
//! after a wakeup, so an idle worker costs nothing. In polling mode the
//! driver calls `progress()` on every scheduler iteration, yielding in
//! between so the rest of the cooperative thread keeps running.

use std::rc::{Rc, Weak};

use crate::config::ProgressMode;
use crate::providers::Providers;
use crate::task::TaskProvider;
use crate::worker::WorkerShared;

/// Spawn the progress driver task for a freshly created worker.
pub(crate) fn start_driver<P: Providers>(shared: &Rc<WorkerShared<P>>) {
    let mode = shared.config.progress_mode;
    let weak = Rc::downgrade(shared);
    let wakeup = shared.wakeup.clone();
    let task = shared.providers.task().clone();

    tracing::debug!(?mode, "starting progress driver");
    match mode {
        ProgressMode::Blocking => {
            task.spawn_task("progress_driver", blocking_loop(weak, wakeup));
        }
        ProgressMode::Polling => {
            task.spawn_task("progress_driver", polling_loop(weak));
        }
    }
}

/// Suspend until woken, then make progress. Never calls `progress()`
/// without a preceding wakeup.
async fn blocking_loop<P: Providers>(
    weak: Weak<WorkerShared<P>>,
    wakeup: Rc<tokio::sync::Notify>,
) {
    loop {
        wakeup.notified().await;
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if shared.is_closed() {
            break;
        }
        shared.progress();
    }
    tracing::debug!("blocking progress driver exiting");
}

/// Make progress on every scheduler iteration regardless of wakeups.
async fn polling_loop<P: Providers>(weak: Weak<WorkerShared<P>>) {
    loop {
        {
            let Some(shared) = weak.upgrade() else {
                break;
            };
            if shared.is_closed() {
                break;
            }
            shared.progress();
        }
        tokio::task::yield_now().await;
    }
    tracing::debug!("polling progress driver exiting");
}
