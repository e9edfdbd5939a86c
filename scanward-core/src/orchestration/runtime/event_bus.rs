use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::orchestration::events::{ScanEvent, ScanEventPublisher};

/// Broadcast fan-out of scan lifecycle events to in-process observers.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped, and slow subscribers observe `Lagged`.
pub struct InProcScanEventBus {
    sender: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcScanEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcScanEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcScanEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ScanEventPublisher for InProcScanEventBus {
    async fn publish(&self, event: ScanEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}

// Lets consumers subscribe without naming the concrete bus type.
pub trait ScanEventStream: Send + Sync {
    fn subscribe_scan_events(&self) -> broadcast::Receiver<ScanEvent>;
}

impl ScanEventStream for InProcScanEventBus {
    fn subscribe_scan_events(&self) -> broadcast::Receiver<ScanEvent> {
        self.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::events::ScanEventPayload;
    use scanward_model::ScanJobId;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = InProcScanEventBus::new(8);
        let mut rx = bus.subscribe_scan_events();
        let job_id = ScanJobId::new();

        bus.publish(ScanEvent::new(job_id, ScanEventPayload::Started))
            .await
            .unwrap();
        bus.publish(ScanEvent::new(job_id, ScanEventPayload::Completed))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "started");
        let last = rx.recv().await.unwrap();
        assert_eq!(last.job_id, job_id);
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = InProcScanEventBus::new(0);
        bus.publish(ScanEvent::new(ScanJobId::new(), ScanEventPayload::Cancelled))
            .await
            .unwrap();
    }
}
