//! Automatic mounting of discovered providers.
//!
//! Device discovery announces providers as they come and go. [`AutoMount`]
//! gives each new filesystem a short name derived from its address, mounts
//! it under the mount root (raw drives under the device root), and fires a
//! `mounted` event. Removal unmounts every binding of the provider and fires
//! `unmounted`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::VfsConfig;
use crate::scheduler::NamedEvent;
use crate::vfs::{Provider, Vfs, VfsError, VfsResult, path};

/// Type tag of providers mounted under the mount root.
pub const FILESYSTEM_TYPE: &str = "filesystem";

/// Type tag of raw block providers, mounted under the device root.
pub const DRIVE_TYPE: &str = "drive";

/// Event name fired after a provider is mounted. Args: address, mount point.
pub const MOUNTED_EVENT: &str = "mounted";

/// Event name fired after a provider is unmounted. Args: address.
pub const UNMOUNTED_EVENT: &str = "unmounted";

/// Notification from device discovery.
#[derive(Clone)]
pub enum DiscoveryEvent {
    Added {
        address: String,
        kind: String,
        provider: Arc<dyn Provider>,
    },
    Removed {
        address: String,
        kind: String,
    },
}

impl std::fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryEvent::Added { address, kind, .. } => f
                .debug_struct("Added")
                .field("address", address)
                .field("kind", kind)
                .finish(),
            DiscoveryEvent::Removed { address, kind } => f
                .debug_struct("Removed")
                .field("address", address)
                .field("kind", kind)
                .finish(),
        }
    }
}

/// Runs autorun scripts found on new mounts.
#[async_trait]
pub trait AutorunShell: Send + Sync {
    /// Execute the script at `script` (a VFS path) for `mount_point`.
    async fn execute(&self, script: &str, mount_point: &str) -> Result<(), String>;
}

/// Mounts and unmounts providers in response to discovery events.
pub struct AutoMount {
    vfs: Arc<Vfs>,
    config: VfsConfig,
    shell: Option<Arc<dyn AutorunShell>>,
}

impl std::fmt::Debug for AutoMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoMount")
            .field("config", &self.config)
            .field("shell", &self.shell.is_some())
            .finish()
    }
}

impl AutoMount {
    pub fn new(vfs: Arc<Vfs>, config: VfsConfig) -> Self {
        Self {
            vfs,
            config,
            shell: None,
        }
    }

    /// Attach the shell used for autorun scripts.
    pub fn with_shell(mut self, shell: Arc<dyn AutorunShell>) -> Self {
        self.shell = Some(shell);
        self
    }

    fn root_for(&self, kind: &str) -> Option<&str> {
        match kind {
            FILESYSTEM_TYPE => Some(&self.config.mount_root),
            DRIVE_TYPE => Some(&self.config.device_root),
            _ => None,
        }
    }

    /// Handle one discovery event.
    ///
    /// Returns the mount point for a newly mounted provider.
    pub async fn handle(&self, event: DiscoveryEvent) -> VfsResult<Option<String>> {
        match event {
            DiscoveryEvent::Added {
                address,
                kind,
                provider,
            } => self.added(&address, &kind, provider).await,
            DiscoveryEvent::Removed { address, kind } => {
                self.removed(&address, &kind);
                Ok(None)
            }
        }
    }

    /// Consume events until the sender side closes.
    pub async fn run(self, mut events: mpsc::Receiver<DiscoveryEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                tracing::warn!(error = %e, "automount failed");
            }
        }
        tracing::debug!("discovery channel closed");
    }

    async fn added(
        &self,
        address: &str,
        kind: &str,
        provider: Arc<dyn Provider>,
    ) -> VfsResult<Option<String>> {
        let Some(root) = self.root_for(kind) else {
            tracing::trace!(%address, %kind, "ignoring provider type");
            return Ok(None);
        };
        if self.config.is_excluded(address) {
            tracing::debug!(%address, "address excluded from automount");
            return Ok(None);
        }

        self.vfs.registry().register(Arc::clone(&provider));
        let mount_point = self.mount_point(root, address).await?;
        self.vfs.mount(provider, &mount_point)?;
        self.vfs
            .scheduler()
            .fire(NamedEvent::new(MOUNTED_EVENT, [address, mount_point.as_str()]));

        if self.vfs.autorun(None) {
            self.autorun(&mount_point).await;
        }
        Ok(Some(mount_point))
    }

    fn removed(&self, address: &str, kind: &str) {
        if self.root_for(kind).is_none() {
            return;
        }

        let mut total = 0;
        loop {
            let removed = self.vfs.unmount_provider(address);
            if removed == 0 {
                break;
            }
            total += removed;
        }
        self.vfs.registry().deregister(address);
        tracing::debug!(%address, bindings = total, "provider removed");
        self.vfs
            .scheduler()
            .fire(NamedEvent::new(UNMOUNTED_EVENT, [address]));
    }

    /// Shortest free `<root>/<address prefix>`, starting at the configured length.
    async fn mount_point(&self, root: &str, address: &str) -> VfsResult<String> {
        let chars: Vec<char> = address.chars().collect();
        let start = self.config.name_prefix_len.min(chars.len()).max(1);

        for len in start..=chars.len() {
            let name: String = chars[..len].iter().collect();
            let candidate = path::concat(root, &name);
            if !self.vfs.exists(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(VfsError::already_mounted(path::concat(root, address)))
    }

    async fn autorun(&self, mount_point: &str) {
        let Some(shell) = &self.shell else {
            return;
        };

        for name in &self.config.autorun_names {
            let script = path::concat(mount_point, name);
            if !self.vfs.exists(&script).await || self.vfs.is_directory(&script).await {
                continue;
            }

            tracing::info!(%script, "running autorun script");
            if let Err(e) = shell.execute(&script, mount_point).await {
                tracing::warn!(%script, error = %e, "autorun script failed");
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::vfs::MemoryProvider;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingShell {
        runs: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl AutorunShell for RecordingShell {
        async fn execute(&self, script: &str, mount_point: &str) -> Result<(), String> {
            self.runs
                .lock()
                .push((script.to_string(), mount_point.to_string()));
            if self.fail {
                Err("script error".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn setup(config: VfsConfig) -> (Arc<Vfs>, Arc<ManualScheduler>, AutoMount) {
        let scheduler = ManualScheduler::new();
        let vfs = Arc::new(Vfs::with_config(&config, scheduler.clone()));
        let automount = AutoMount::new(vfs.clone(), config);
        (vfs, scheduler, automount)
    }

    fn added(address: &str, kind: &str) -> DiscoveryEvent {
        DiscoveryEvent::Added {
            address: address.to_string(),
            kind: kind.to_string(),
            provider: Arc::new(MemoryProvider::with_address(address)),
        }
    }

    fn removed(address: &str) -> DiscoveryEvent {
        DiscoveryEvent::Removed {
            address: address.to_string(),
            kind: FILESYSTEM_TYPE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_mounts_under_short_name() {
        let (vfs, scheduler, automount) = setup(VfsConfig::default());

        let mounted = automount.handle(added("a1f09c", FILESYSTEM_TYPE)).await.unwrap();
        assert_eq!(mounted.as_deref(), Some("/mnt/a1f"));
        assert!(vfs.exists("/mnt/a1f").await);
        assert_eq!(vfs.registry().len(), 1);
        assert_eq!(
            scheduler.take_events(),
            vec![NamedEvent::new(MOUNTED_EVENT, ["a1f09c", "/mnt/a1f"])]
        );
    }

    #[tokio::test]
    async fn test_name_lengthens_on_collision() {
        let (_, _, automount) = setup(VfsConfig::default());

        automount.handle(added("a1f09c", FILESYSTEM_TYPE)).await.unwrap();
        let second = automount.handle(added("a1f7d2", FILESYSTEM_TYPE)).await.unwrap();
        assert_eq!(second.as_deref(), Some("/mnt/a1f7"));
    }

    #[tokio::test]
    async fn test_drive_mounts_under_device_root() {
        let (_, _, automount) = setup(VfsConfig::default());
        let mounted = automount.handle(added("7c2e11", DRIVE_TYPE)).await.unwrap();
        assert_eq!(mounted.as_deref(), Some("/dev/7c2"));
    }

    #[tokio::test]
    async fn test_ignores_unknown_and_excluded() {
        let config = VfsConfig {
            excluded_addresses: vec!["bootdisk".to_string()],
            ..VfsConfig::default()
        };
        let (vfs, scheduler, automount) = setup(config);

        assert_eq!(automount.handle(added("b33f", "keyboard")).await.unwrap(), None);
        assert_eq!(automount.handle(added("bootdisk", FILESYSTEM_TYPE)).await.unwrap(), None);
        assert_eq!(vfs.mounts().count(), 0);
        assert!(vfs.registry().is_empty());
        assert!(scheduler.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_removal_unmounts_everywhere() {
        let (vfs, scheduler, automount) = setup(VfsConfig::default());
        automount.handle(added("a1f09c", FILESYSTEM_TYPE)).await.unwrap();
        let provider = vfs.proxy("a1f").unwrap();
        vfs.mount(provider, "/home").unwrap();
        scheduler.take_events();

        automount.handle(removed("a1f09c")).await.unwrap();
        assert_eq!(vfs.mounts().count(), 0);
        assert!(!vfs.exists("/mnt").await);
        assert!(vfs.registry().is_empty());
        assert_eq!(
            scheduler.take_events(),
            vec![NamedEvent::new(UNMOUNTED_EVENT, ["a1f09c"])]
        );
    }

    #[tokio::test]
    async fn test_autorun_runs_first_script() {
        let config = VfsConfig {
            autorun: true,
            ..VfsConfig::default()
        };
        let (_, _, automount) = setup(config);
        let shell = Arc::new(RecordingShell::default());
        let automount = automount.with_shell(shell.clone());

        let provider = Arc::new(MemoryProvider::with_address("d15c00"));
        provider.insert_file("autorun.lua", "print('hi')").unwrap();
        provider.insert_file(".autorun", "ignored").unwrap();
        automount
            .handle(DiscoveryEvent::Added {
                address: "d15c00".to_string(),
                kind: FILESYSTEM_TYPE.to_string(),
                provider,
            })
            .await
            .unwrap();

        assert_eq!(
            *shell.runs.lock(),
            vec![("/mnt/d15/autorun.lua".to_string(), "/mnt/d15".to_string())]
        );
    }

    #[tokio::test]
    async fn test_autorun_disabled_or_failing() {
        let (vfs, _, automount) = setup(VfsConfig::default());
        let shell = Arc::new(RecordingShell {
            fail: true,
            ..RecordingShell::default()
        });
        let automount = automount.with_shell(shell.clone());

        let provider = Arc::new(MemoryProvider::with_address("d15c00"));
        provider.insert_file("autorun", "x").unwrap();
        let event = DiscoveryEvent::Added {
            address: "d15c00".to_string(),
            kind: FILESYSTEM_TYPE.to_string(),
            provider,
        };

        automount.handle(event.clone()).await.unwrap();
        assert!(shell.runs.lock().is_empty());

        // Failure is logged, not returned
        automount.handle(removed("d15c00")).await.unwrap();
        vfs.autorun(Some(true));
        assert!(automount.handle(event).await.is_ok());
        assert_eq!(shell.runs.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_run_consumes_channel() {
        let (vfs, _, automount) = setup(VfsConfig::default());
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(automount.run(rx));

        tx.send(added("a1f09c", FILESYSTEM_TYPE)).await.unwrap();
        tx.send(added("7c2e11", FILESYSTEM_TYPE)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let mut paths: Vec<_> = vfs.mounts().map(|(_, path)| path).collect();
        paths.sort();
        assert_eq!(paths, vec!["/mnt/7c2", "/mnt/a1f"]);
    }
}
