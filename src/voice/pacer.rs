use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub const TICK: Duration = Duration::from_millis(20);
// ~500 ms of audio; older packets are dropped rather than backpressuring
const MAX_QUEUE: usize = 25;

/// Seam between the paced sender and the actual Discord voice connection.
#[async_trait]
pub trait VoiceTransport: Send {
    async fn send_packet(&mut self, packet: Vec<u8>);
    async fn set_speaking(&mut self, speaking: bool);
}

enum PacerCmd {
    Packet(Vec<u8>),
    Interrupt,
    Stop,
}

/// Pulls one Opus packet off the queue every 20 ms and hands it to the
/// transport, toggling the speaking flag at queue start/drain. An interrupt
/// clears the queue immediately.
pub struct PacedSender {
    tx: mpsc::UnboundedSender<PacerCmd>,
    task: Option<JoinHandle<()>>,
}

impl PacedSender {
    pub fn spawn<T: VoiceTransport + 'static>(mut transport: T) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut queue: VecDeque<Vec<u8>> = VecDeque::new();
            let mut speaking = false;
            let mut tick = tokio::time::interval(TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(PacerCmd::Packet(packet)) => {
                            queue.push_back(packet);
                            if queue.len() > MAX_QUEUE {
                                queue.pop_front();
                                warn!("Voice send queue overflow, dropping oldest packet");
                            }
                        }
                        Some(PacerCmd::Interrupt) => {
                            queue.clear();
                            if speaking {
                                transport.set_speaking(false).await;
                                speaking = false;
                            }
                        }
                        Some(PacerCmd::Stop) | None => break,
                    },
                    _ = tick.tick() => {
                        match queue.pop_front() {
                            Some(packet) => {
                                if !speaking {
                                    transport.set_speaking(true).await;
                                    speaking = true;
                                }
                                transport.send_packet(packet).await;
                            }
                            None => {
                                if speaking {
                                    transport.set_speaking(false).await;
                                    speaking = false;
                                }
                            }
                        }
                    }
                }
            }

            if speaking {
                transport.set_speaking(false).await;
            }
        });

        Self {
            tx,
            task: Some(task),
        }
    }

    pub fn enqueue(&self, packet: Vec<u8>) {
        let _ = self.tx.send(PacerCmd::Packet(packet));
    }

    /// The model was cut off; stop talking right now.
    pub fn interrupt(&self) {
        let _ = self.tx.send(PacerCmd::Interrupt);
    }

    pub async fn stop(mut self, drain: Duration) {
        let _ = self.tx.send(PacerCmd::Stop);
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(drain, task).await.is_err() {
                warn!("Paced sender did not drain in time");
            }
        }
    }
}

impl Drop for PacedSender {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.tx.send(PacerCmd::Stop);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Observed {
        Speaking(bool),
        Packet(Vec<u8>),
    }

    #[derive(Clone, Default)]
    struct MockTransport {
        log: Arc<Mutex<Vec<Observed>>>,
    }

    #[async_trait]
    impl VoiceTransport for MockTransport {
        async fn send_packet(&mut self, packet: Vec<u8>) {
            self.log.lock().unwrap().push(Observed::Packet(packet));
        }

        async fn set_speaking(&mut self, speaking: bool) {
            self.log.lock().unwrap().push(Observed::Speaking(speaking));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn packets_go_out_one_per_tick_with_speaking_toggles() {
        let transport = MockTransport::default();
        let log = transport.log.clone();
        let sender = PacedSender::spawn(transport);

        sender.enqueue(vec![1]);
        sender.enqueue(vec![2]);
        sender.enqueue(vec![3]);

        // 3 packet ticks plus one idle tick to drop the speaking flag
        tokio::time::sleep(TICK * 5).await;

        let observed = log.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                Observed::Speaking(true),
                Observed::Packet(vec![1]),
                Observed::Packet(vec![2]),
                Observed::Packet(vec![3]),
                Observed::Speaking(false),
            ]
        );

        sender.stop(Duration::from_secs(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_clears_queue_and_silences() {
        let transport = MockTransport::default();
        let log = transport.log.clone();
        let sender = PacedSender::spawn(transport);

        for i in 0..10u8 {
            sender.enqueue(vec![i]);
        }
        tokio::time::sleep(TICK * 2).await;
        sender.interrupt();
        tokio::time::sleep(TICK * 4).await;

        let observed = log.lock().unwrap().clone();
        let packets = observed
            .iter()
            .filter(|o| matches!(o, Observed::Packet(_)))
            .count();
        assert!(packets < 10, "interrupt should drop queued packets");
        assert_eq!(observed.last(), Some(&Observed::Speaking(false)));

        sender.stop(Duration::from_secs(2)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn queue_is_bounded() {
        let transport = MockTransport::default();
        let log = transport.log.clone();
        let sender = PacedSender::spawn(transport);

        for i in 0..100u8 {
            sender.enqueue(vec![i]);
        }
        // long enough to drain whatever survived the bound
        tokio::time::sleep(TICK * 60).await;

        let packets: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                Observed::Packet(p) => Some(p[0]),
                _ => None,
            })
            .collect();
        assert!(packets.len() <= MAX_QUEUE + 1, "bound not applied: {}", packets.len());
        // survivors are the newest packets, in order
        assert!(packets.windows(2).all(|w| w[0] < w[1]));

        sender.stop(Duration::from_secs(2)).await;
    }
}
