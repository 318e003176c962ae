use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    action::Action,
    error::{Result, SchedulerError},
};

/// Create the unbounded FIFO every state transition goes through.
pub fn channel() -> (ActionQueue, mpsc::UnboundedReceiver<Action>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ActionQueue { tx }, rx)
}

/// Producer side of the action queue. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<Action>,
}

impl ActionQueue {
    pub fn enqueue(&self, action: Action) -> Result<()> {
        debug!(%action, "enqueue");
        self.tx.send(action).map_err(|_| SchedulerError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    #[test]
    fn actions_come_out_in_fifo_order() {
        let (queue, mut rx) = channel();
        queue.enqueue(Action::stop()).unwrap();
        let job = std::sync::Arc::new(crate::job::Job::new(crate::types::JobSpec::new("a", "true")));
        queue.enqueue(Action::new(ActionKind::Run, &job)).unwrap();

        assert_eq!(rx.try_recv().unwrap().kind, ActionKind::Stop);
        assert_eq!(rx.try_recv().unwrap().kind, ActionKind::Run);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn enqueue_after_receiver_dropped_fails() {
        let (queue, rx) = channel();
        drop(rx);
        assert!(matches!(
            queue.enqueue(Action::stop()),
            Err(SchedulerError::QueueClosed)
        ));
    }
}
