use crate::event::{Event, EventSender, Origin};
use std::thread;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const REQUEST_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub resident_bytes: u64,
}

impl ResourceUsage {
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRequest {
    pub origin: Origin,
    pub pid: u32,
}

/// Machine-wide load, both as percentages of capacity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Result for one request. `usage` is `None` when the process could not be read this round.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub origin: Origin,
    pub usage: Option<ResourceUsage>,
}

/// Everything read in one sampling round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatsRound {
    pub system: SystemUsage,
    pub samples: Vec<ResourceSample>,
}

/// Keeps one `System` alive between rounds so CPU usage is measured against the previous refresh.
pub struct StatsSampler {
    system: System,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn sample(&mut self, requests: &[StatsRequest]) -> StatsRound {
        StatsRound {
            system: self.sample_system(),
            samples: self.sample_processes(requests),
        }
    }

    fn sample_system(&mut self) -> SystemUsage {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 * 100.0 / total as f64
        };
        SystemUsage {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            memory_percent,
        }
    }

    fn sample_processes(&mut self, requests: &[StatsRequest]) -> Vec<ResourceSample> {
        if requests.is_empty() {
            return Vec::new();
        }
        let pids: Vec<Pid> = requests.iter().map(|req| Pid::from_u32(req.pid)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        requests
            .iter()
            .map(|req| {
                let usage = self
                    .system
                    .process(Pid::from_u32(req.pid))
                    .map(|process| ResourceUsage {
                        cpu_percent: f64::from(process.cpu_usage()),
                        resident_bytes: process.memory(),
                    });
                ResourceSample {
                    origin: req.origin.clone(),
                    usage,
                }
            })
            .collect()
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts the sampling thread and returns the queue that feeds it.
///
/// Process tables are read synchronously, so sampling stays off the runtime. Each batch of
/// requests, even an empty one, produces one [`Event::StatsSampled`] carrying machine-wide load
/// as well. The thread ends when either side closes.
pub fn spawn_sampler(events: EventSender) -> std::io::Result<mpsc::Sender<Vec<StatsRequest>>> {
    let (tx, mut rx) = mpsc::channel::<Vec<StatsRequest>>(REQUEST_QUEUE_CAPACITY);
    thread::Builder::new()
        .name("devdeck-stats".to_string())
        .spawn(move || {
            let mut sampler = StatsSampler::new();
            while let Some(requests) = rx.blocking_recv() {
                let round = sampler.sample(&requests);
                debug!(count = round.samples.len(), "stats sampled");
                if events.blocking_send(Event::StatsSampled(round)).is_err() {
                    break;
                }
            }
            warn!("stats sampler stopped");
        })?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HandleId;

    fn request(pid: u32) -> StatsRequest {
        StatsRequest {
            origin: Origin {
                task: "self".to_string(),
                handle: HandleId::next(),
                generation: 1,
            },
            pid,
        }
    }

    #[test]
    fn samples_current_process() {
        let mut sampler = StatsSampler::new();
        let samples = sampler.sample(&[request(std::process::id())]).samples;
        assert_eq!(samples.len(), 1);
        let usage = samples[0].usage.expect("own process is readable");
        assert!(usage.resident_bytes > 0);
        assert!(usage.cpu_percent >= 0.0);
    }

    #[test]
    fn missing_process_yields_no_usage() {
        let mut sampler = StatsSampler::new();
        let samples = sampler.sample(&[request(u32::MAX - 7)]).samples;
        assert_eq!(samples.len(), 1);
        assert!(samples[0].usage.is_none());
    }

    #[test]
    fn empty_round_still_reads_system_load() {
        let mut sampler = StatsSampler::new();
        let round = sampler.sample(&[]);
        assert!(round.samples.is_empty());
        assert!(round.system.memory_percent > 0.0);
        assert!(round.system.memory_percent <= 100.0);
        assert!(round.system.cpu_percent >= 0.0);
    }

    #[tokio::test]
    async fn sampler_thread_answers_each_batch() {
        let (events, mut rx) = crate::event::event_channel();
        let requests = spawn_sampler(events).expect("spawn");
        requests.send(Vec::new()).await.expect("send");
        match rx.recv().await {
            Some(Event::StatsSampled(round)) => assert!(round.samples.is_empty()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn resident_mb_converts_bytes() {
        let usage = ResourceUsage {
            cpu_percent: 0.0,
            resident_bytes: 3 * 1024 * 1024,
        };
        assert!((usage.resident_mb() - 3.0).abs() < f64::EPSILON);
    }
}
