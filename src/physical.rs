use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use evdev::{Device, EventStream, InputEvent};

use crate::{
    discovery::{DeviceScanner, DiscoveredDevice, Discovery, DiscoveryError, UdevScanner},
    error::BridgeError,
};

/// Raw events of a grabbed physical controller.
pub trait EventSource {
    /// Waits for the next event. An error means the device is gone.
    fn next_event(&mut self) -> impl Future<Output = io::Result<InputEvent>>;

    /// Gives up exclusive access and closes the device.
    fn release(self);
}

/// Finds the physical controller and takes exclusive ownership of it.
pub trait ControllerProvider {
    type Source: EventSource;

    fn discover(&self) -> Result<DiscoveredDevice, DiscoveryError>;

    fn acquire(
        &self,
        device: &DiscoveredDevice,
    ) -> impl Future<Output = Result<Self::Source, BridgeError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabPolicy {
    pub retries: u32,
    pub retry_delay: Duration,
    /// Also grab the other interfaces of the product so they don't leak input
    pub auxiliary: bool,
}

pub struct GrabbedController {
    path: PathBuf,
    stream: EventStream,
    auxiliary: Vec<(PathBuf, Device)>,
}

impl EventSource for GrabbedController {
    async fn next_event(&mut self) -> io::Result<InputEvent> {
        self.stream.next_event().await
    }

    fn release(mut self) {
        if let Err(e) = self.stream.device_mut().ungrab() {
            tracing::debug!("Ungrab {:?} failed, it is probably gone: {e}", self.path);
        }
        for (path, device) in &mut self.auxiliary {
            if let Err(e) = device.ungrab() {
                tracing::debug!("Ungrab auxiliary {path:?} failed: {e}");
            }
        }
        tracing::info!("Released {:?}", self.path);
    }
}

fn open_grabbed(path: &Path) -> io::Result<Device> {
    let mut device = Device::open(path)?;
    device.grab()?;
    Ok(device)
}

pub struct EvdevProvider<S = UdevScanner> {
    discovery: Discovery<S>,
    policy: GrabPolicy,
}

impl<S: DeviceScanner> EvdevProvider<S> {
    pub fn new(discovery: Discovery<S>, policy: GrabPolicy) -> Self {
        Self { discovery, policy }
    }

    async fn grab_primary(&self, path: &Path) -> Result<Device, BridgeError> {
        let mut attempt = 0;
        loop {
            match open_grabbed(path) {
                Ok(device) => return Ok(device),
                Err(e) if attempt < self.policy.retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Cannot grab {path:?} ({e}), retry {attempt}/{} in {:?}",
                        self.policy.retries,
                        self.policy.retry_delay
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(source) => {
                    return Err(BridgeError::Acquisition {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }

    fn grab_auxiliary(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Device)> {
        if !self.policy.auxiliary {
            return Vec::new();
        }
        paths
            .iter()
            .filter_map(|path| match open_grabbed(path) {
                Ok(device) => {
                    tracing::debug!("Grabbed auxiliary interface {path:?}");
                    Some((path.clone(), device))
                }
                Err(e) => {
                    tracing::warn!("Could not grab auxiliary interface {path:?}: {e}");
                    None
                }
            })
            .collect()
    }
}

impl<S: DeviceScanner> ControllerProvider for EvdevProvider<S> {
    type Source = GrabbedController;

    fn discover(&self) -> Result<DiscoveredDevice, DiscoveryError> {
        self.discovery.discover()
    }

    async fn acquire(&self, found: &DiscoveredDevice) -> Result<GrabbedController, BridgeError> {
        let device = self.grab_primary(&found.path).await?;
        tracing::info!("Exclusively grabbed {:?} ({})", found.path, found.name);

        let auxiliary = self.grab_auxiliary(&found.auxiliary);
        let stream = device
            .into_event_stream()
            .map_err(|source| BridgeError::Acquisition {
                path: found.path.clone(),
                source,
            })?;

        Ok(GrabbedController {
            path: found.path.clone(),
            stream,
            auxiliary,
        })
    }
}
