use crate::error::ProbeError;
use crate::event::{Event, EventSender, HealthNotice, Origin};
use crate::task::{HealthProbe, ProbeKind};
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthState {
    #[default]
    Unchecked,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn label(&self) -> &'static str {
        match self {
            HealthState::Unchecked => "unchecked",
            HealthState::Starting => "starting",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runs one configured probe. HTTP probes reuse a single client for the life of the run.
#[derive(Debug, Clone)]
pub struct Prober {
    probe: HealthProbe,
    http: Option<reqwest::Client>,
}

impl Prober {
    pub fn new(probe: HealthProbe) -> Self {
        let http = match probe.kind {
            ProbeKind::Http => match reqwest::Client::builder().timeout(probe.timeout()).build() {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(target = %probe.target, error = %err, "http probe client unavailable");
                    None
                }
            },
            ProbeKind::Tcp => None,
        };
        Self { probe, http }
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub async fn check(&self) -> Result<(), ProbeError> {
        match self.probe.kind {
            ProbeKind::Tcp => self.check_tcp().await,
            ProbeKind::Http => self.check_http().await,
        }
    }

    async fn check_tcp(&self) -> Result<(), ProbeError> {
        let target = self.probe.target.clone();
        let timeout = self.probe.timeout();
        let attempt = tokio::time::timeout(timeout, TcpStream::connect(target.clone())).await;
        match attempt {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(source)) => Err(ProbeError::Connect { target, source }),
            Err(_) => Err(ProbeError::Timeout {
                target,
                timeout_ms: timeout.as_millis(),
            }),
        }
    }

    async fn check_http(&self) -> Result<(), ProbeError> {
        let target = self.probe.target.clone();
        let Some(client) = &self.http else {
            return Err(ProbeError::Client(target));
        };
        let response = client
            .get(target.as_str())
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    ProbeError::Timeout {
                        target: target.clone(),
                        timeout_ms: self.probe.timeout().as_millis(),
                    }
                } else {
                    ProbeError::Http {
                        target: target.clone(),
                        source,
                    }
                }
            })?;
        let status = response.status().as_u16();
        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(ProbeError::Status { target, status })
        }
    }
}

/// Probes until `alive` flips to false or its sender goes away.
///
/// The first probe runs immediately. Each result is posted as a [`HealthNotice`] for `origin`;
/// once the run ends, a final `Unchecked` is posted so the handle drops its stale verdict.
pub async fn probe_loop(
    prober: Prober,
    mut alive: watch::Receiver<bool>,
    origin: Origin,
    events: EventSender,
) {
    let interval = prober.probe().interval();
    loop {
        if !*alive.borrow() {
            break;
        }
        let health = match prober.check().await {
            Ok(()) => HealthState::Healthy,
            Err(err) => {
                debug!(task = %origin.task, error = %err, "health probe failed");
                HealthState::Unhealthy
            }
        };
        if !*alive.borrow() {
            break;
        }
        if post(&events, &origin, health).await.is_err() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = alive.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    let _ = post(&events, &origin, HealthState::Unchecked).await;
}

async fn post(events: &EventSender, origin: &Origin, health: HealthState) -> Result<(), ()> {
    events
        .send(Event::Health(HealthNotice {
            origin: origin.clone(),
            health,
        }))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{event_channel, HandleId};
    use tokio::net::TcpListener;

    fn origin() -> Origin {
        Origin {
            task: "api".to_string(),
            handle: HandleId::next(),
            generation: 1,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tcp_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let prober = Prober::new(HealthProbe::new(ProbeKind::Tcp, addr.to_string()));
        assert!(prober.check().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tcp_probe_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let prober =
            Prober::new(HealthProbe::new(ProbeKind::Tcp, addr.to_string()).with_timing(100, 200));
        assert!(prober.check().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_reports_unhealthy_then_unchecked_after_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (events, mut rx) = event_channel();
        let (alive_tx, alive_rx) = watch::channel(true);
        let prober =
            Prober::new(HealthProbe::new(ProbeKind::Tcp, addr.to_string()).with_timing(50, 50));
        let task = tokio::spawn(probe_loop(prober, alive_rx, origin(), events));

        let first = rx.recv().await.expect("first notice");
        match first {
            Event::Health(notice) => assert_eq!(notice.health, HealthState::Unhealthy),
            other => panic!("unexpected event {other:?}"),
        }

        alive_tx.send(false).expect("signal");
        task.await.expect("join");

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(Event::Health(notice)) => assert_eq!(notice.health, HealthState::Unchecked),
            other => panic!("unexpected final event {other:?}"),
        }
    }
}
