//! Connection registry: owns the per-remote-participant links and the
//! create/close extension hooks.
//!
//! Hooks are best-effort fan-out: each hook's failure is logged and isolated,
//! it never prevents the other hooks from running nor the connection from
//! being registered or removed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::PeerEvent;
use crate::link::{IceStateObserver, LinkError, PeerConnector, PeerLink};

/// Called when a connection is created, with the remote id, whether the local
/// side is the offerer, and the transport-engine link. Hooks may attach to
/// the link (e.g. create a data channel through the concrete handle) but must
/// not retain it for mutation past the call.
pub type CreateHook = Box<dyn Fn(&str, bool, &Arc<dyn PeerLink>) -> anyhow::Result<()> + Send + Sync>;

/// Called with the remote id when a connection is being closed.
pub type CloseHook = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

pub(crate) struct Connection {
    pub(crate) link: Arc<dyn PeerLink>,
    /// Pending vanilla-ICE finalize task, aborted when the connection closes.
    pub(crate) finalize: Option<JoinHandle<()>>,
}

pub(crate) struct PeerRegistry {
    connector: Arc<dyn PeerConnector>,
    events: mpsc::UnboundedSender<PeerEvent>,
    entries: HashMap<String, Connection>,
    create_hooks: Vec<CreateHook>,
    close_hooks: Vec<CloseHook>,
}

impl PeerRegistry {
    pub(crate) fn new(
        connector: Arc<dyn PeerConnector>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            connector,
            events,
            entries: HashMap::new(),
            create_hooks: Vec::new(),
            close_hooks: Vec::new(),
        }
    }

    pub(crate) fn add_create_hook(&mut self, hook: CreateHook) {
        self.create_hooks.push(hook);
    }

    pub(crate) fn add_close_hook(&mut self, hook: CloseHook) {
        self.close_hooks.push(hook);
    }

    pub(crate) fn contains(&self, remote_id: &str) -> bool {
        self.entries.contains_key(remote_id)
    }

    pub(crate) fn link(&self, remote_id: &str) -> Option<Arc<dyn PeerLink>> {
        self.entries.get(remote_id).map(|entry| entry.link.clone())
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Creates a connection for `remote_id` unless one already exists, in
    /// which case the existing link is returned and no hooks run. On
    /// creation the link is inserted only after every create hook has had
    /// its chance to run.
    pub(crate) async fn create_if_absent(
        &mut self,
        remote_id: &str,
        is_offerer: bool,
        observer: IceStateObserver,
    ) -> Result<Arc<dyn PeerLink>, LinkError> {
        if let Some(entry) = self.entries.get(remote_id) {
            return Ok(entry.link.clone());
        }

        let link = self.connector.open(remote_id, observer).await?;
        let _ = self.events.send(PeerEvent::UserConnecting {
            id: remote_id.to_string(),
        });

        for hook in &self.create_hooks {
            if let Err(err) = hook(remote_id, is_offerer, &link) {
                tracing::warn!(
                    target: "shoal::registry",
                    peer_id = %remote_id,
                    error = %err,
                    "create hook failed"
                );
            }
        }

        self.entries.insert(
            remote_id.to_string(),
            Connection {
                link: link.clone(),
                finalize: None,
            },
        );
        Ok(link)
    }

    /// Attaches the finalize task for `remote_id`. If the connection is
    /// already gone the task is aborted right away.
    pub(crate) fn set_finalize(&mut self, remote_id: &str, task: JoinHandle<()>) {
        match self.entries.get_mut(remote_id) {
            Some(entry) => {
                if let Some(old) = entry.finalize.replace(task) {
                    old.abort();
                }
            }
            None => task.abort(),
        }
    }

    /// Closes and removes the connection for `remote_id`. Returns `false`
    /// if there was none.
    pub(crate) async fn close(&mut self, remote_id: &str) -> bool {
        let Some(mut entry) = self.entries.remove(remote_id) else {
            return false;
        };
        let _ = self.events.send(PeerEvent::UserDisconnecting {
            id: remote_id.to_string(),
        });

        for hook in &self.close_hooks {
            if let Err(err) = hook(remote_id) {
                tracing::warn!(
                    target: "shoal::registry",
                    peer_id = %remote_id,
                    error = %err,
                    "close hook failed"
                );
            }
        }

        if let Some(task) = entry.finalize.take() {
            task.abort();
        }
        entry.link.close().await;
        true
    }

    pub(crate) async fn close_all(&mut self) {
        for id in self.ids() {
            self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::IceConnectionState;
    use crate::mock::MockConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn observer() -> IceStateObserver {
        Arc::new(|_state: IceConnectionState| {})
    }

    fn registry(connector: Arc<MockConnector>) -> (PeerRegistry, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (PeerRegistry::new(connector, events_tx), events_rx)
    }

    #[tokio::test]
    async fn create_is_idempotent_and_runs_hooks_once() {
        let connector = MockConnector::new();
        let (mut registry, _events) = registry(connector.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_hook = calls.clone();
        registry.add_create_hook(Box::new(move |_, _, _| {
            calls_for_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let first = registry
            .create_if_absent("peer-1", true, observer())
            .await
            .unwrap();
        let second = registry
            .create_if_absent("peer-1", true, observer())
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(connector.link_count(), 1);
    }

    #[tokio::test]
    async fn failing_hook_does_not_block_siblings_or_registration() {
        let connector = MockConnector::new();
        let (mut registry, _events) = registry(connector);

        let ran = Arc::new(AtomicUsize::new(0));
        for fail in [false, true, false] {
            let ran = ran.clone();
            registry.add_create_hook(Box::new(move |_, _, _| {
                ran.fetch_add(1, Ordering::SeqCst);
                if fail {
                    anyhow::bail!("hook exploded");
                }
                Ok(())
            }));
        }

        registry
            .create_if_absent("peer-1", false, observer())
            .await
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(registry.contains("peer-1"));
    }

    #[tokio::test]
    async fn failing_close_hook_does_not_block_siblings_or_removal() {
        let connector = MockConnector::new();
        let (mut registry, _events) = registry(connector.clone());

        let ran = Arc::new(AtomicUsize::new(0));
        for fail in [false, true, false] {
            let ran = ran.clone();
            registry.add_close_hook(Box::new(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                if fail {
                    anyhow::bail!("hook exploded");
                }
                Ok(())
            }));
        }

        registry
            .create_if_absent("peer-1", true, observer())
            .await
            .unwrap();
        assert!(registry.close("peer-1").await);

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(), 0);
        assert!(connector.link("peer-1").unwrap().is_closed());
    }

    #[tokio::test]
    async fn close_runs_hooks_and_releases_the_link() {
        let connector = MockConnector::new();
        let (mut registry, mut events) = registry(connector.clone());

        let closed_ids = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let closed_for_hook = closed_ids.clone();
        registry.add_close_hook(Box::new(move |id| {
            closed_for_hook.lock().push(id.to_string());
            Ok(())
        }));

        registry
            .create_if_absent("peer-1", true, observer())
            .await
            .unwrap();
        assert!(registry.close("peer-1").await);
        assert!(!registry.close("peer-1").await);

        assert_eq!(closed_ids.lock().as_slice(), ["peer-1"]);
        assert_eq!(registry.len(), 0);
        assert!(connector.link("peer-1").unwrap().is_closed());

        assert_eq!(
            events.recv().await,
            Some(PeerEvent::UserConnecting { id: "peer-1".into() })
        );
        assert_eq!(
            events.recv().await,
            Some(PeerEvent::UserDisconnecting { id: "peer-1".into() })
        );
    }

    #[tokio::test]
    async fn close_all_drains_every_entry() {
        let connector = MockConnector::new();
        let (mut registry, _events) = registry(connector);

        for id in ["a", "b", "c"] {
            registry.create_if_absent(id, true, observer()).await.unwrap();
        }
        registry.close_all().await;
        assert_eq!(registry.len(), 0);
    }
}
