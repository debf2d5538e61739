use crate::amqp::options::BasicAckOptions;
use crate::amqp::Delivery;
use crate::consumers::{Job, JobError};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::task::Poll;

/// The outcome of handling a single delivery: running the job, then acking the message.
///
/// Both steps always happen: the message is acked even when the job fails or panics.
///
/// [`ProcessingOutcome`] does not expose any constructor: only [`process_delivery`] builds one.
#[derive(Debug)]
pub struct ProcessingOutcome {
    job: Result<(), JobError>,
    ack: Result<(), anyhow::Error>,
}

impl ProcessingOutcome {
    pub fn job_result(&self) -> &Result<(), JobError> {
        &self.job
    }

    pub fn ack_result(&self) -> &Result<(), anyhow::Error> {
        &self.ack
    }

    /// `true` if the job succeeded and the message was acked.
    pub fn is_success(&self) -> bool {
        self.job.is_ok() && self.ack.is_ok()
    }
}

/// Run `job` against the payload of `delivery`, then ack the message exactly once.
///
/// The job runs in its own task: a panic is caught and turned into [`JobError::Panicked`],
/// carrying where it was raised and its stack trace, before the ack is sent.
/// Neither a job failure nor an ack failure is propagated, they are logged and reported
/// in the returned [`ProcessingOutcome`].
#[tracing::instrument(
    name = "process_message",
    skip_all,
    fields(delivery_tag = delivery.delivery_tag, redelivered = delivery.redelivered),
    level = tracing::Level::DEBUG
)]
pub async fn process_delivery(mut delivery: Delivery, job: Arc<dyn Job>) -> ProcessingOutcome {
    let payload = std::mem::take(&mut delivery.data);
    let task = tokio::spawn(async move { run_job(job.as_ref(), &payload).await });

    let job = match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(JobError::Failed(e))) => {
            tracing::error!(error = ?e, "Failed to process message, it will be dropped");
            Err(JobError::Failed(e))
        }
        // Panics caught by `run_job` are logged where their trace is captured.
        Ok(Err(e)) => Err(e),
        Err(e) => match e.try_into_panic() {
            Ok(panic) => {
                let reason = panic_reason(panic.as_ref());
                tracing::error!(
                    reason = %reason,
                    "Recovered from a panic while processing message, it will be dropped"
                );
                Err(JobError::Panicked {
                    reason,
                    location: None,
                    stack_trace: None,
                })
            }
            Err(_) => {
                tracing::warn!("Message processing was aborted, it will be dropped");
                Err(JobError::Aborted)
            }
        },
    };

    let ack = delivery
        .acker
        .ack(BasicAckOptions { multiple: false })
        .await;
    if let Err(e) = &ack {
        tracing::error!(error = ?e, "Failed to ack message");
    }

    ProcessingOutcome { job, ack }
}

struct PanicTrace {
    location: Option<String>,
    stack_trace: String,
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicTrace>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a hook in front of the current one: panics raised while a job is polled are recorded
/// for [`run_job`] instead of being printed.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let trace = PanicTrace {
                    location: info.location().map(|location| location.to_string()),
                    stack_trace: Backtrace::force_capture().to_string(),
                };
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// Poll the job, catching a panic on the thread that raised it so that its trace can be kept.
async fn run_job(job: &dyn Job, payload: &[u8]) -> Result<(), JobError> {
    install_panic_hook();
    let mut processing = job.process(payload);
    std::future::poll_fn(|cx| {
        CAPTURING.with(|capturing| capturing.set(true));
        let polled = std::panic::catch_unwind(AssertUnwindSafe(|| processing.as_mut().poll(cx)));
        CAPTURING.with(|capturing| capturing.set(false));
        match polled {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(result)) => Poll::Ready(result.map_err(JobError::Failed)),
            Err(panic) => {
                let trace = LAST_PANIC.with(|last| last.borrow_mut().take());
                let reason = panic_reason(panic.as_ref());
                let location = trace.as_ref().and_then(|t| t.location.clone());
                let stack_trace = trace.map(|t| t.stack_trace);
                tracing::error!(
                    reason = %reason,
                    location = location.as_deref().unwrap_or("unknown"),
                    stack_trace = stack_trace.as_deref().unwrap_or("unavailable"),
                    "Recovered from a panic while processing message, it will be dropped"
                );
                Poll::Ready(Err(JobError::Panicked {
                    reason,
                    location,
                    stack_trace,
                }))
            }
        }
    })
    .await
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
