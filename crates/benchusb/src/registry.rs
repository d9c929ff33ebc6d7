//! Device registry
//!
//! The registry owns every discovered handle, in newest-first order, plus
//! the host bus they came from and the shared notification poller. It is
//! the single entry point callers hold on to: scan, pick a device, run
//! commands, release or destroy it, and shut the whole thing down.
//!
//! The registry is not internally synchronized. One thread drives it;
//! only the notification poller runs concurrently, and it touches nothing
//! but the ports handed to it at registration.

use tracing::{debug, info, warn};

use protocol::BoardKind;

use crate::bus::HostBus;
use crate::device::{DeviceHandle, ProbeRange};
use crate::discovery;
use crate::error::{Error, Result};
use crate::poller::{NotificationCallback, NotificationPoller};

/// Ordered collection of every discovered device.
pub struct DeviceRegistry {
    bus: Box<dyn HostBus>,
    handles: Vec<DeviceHandle>,
    probe: ProbeRange,
    poller: NotificationPoller,
}

impl DeviceRegistry {
    /// Create a registry over the given host bus.
    pub fn new(bus: Box<dyn HostBus>) -> Self {
        Self::with_probe_range(bus, ProbeRange::default())
    }

    /// Create a registry whose bridge boards probe a custom I2C window.
    pub fn with_probe_range(bus: Box<dyn HostBus>, probe: ProbeRange) -> Self {
        Self {
            bus,
            handles: Vec::new(),
            probe,
            poller: NotificationPoller::new(),
        }
    }

    /// Scan the bus for recognized devices, adding unqueried stubs for
    /// newcomers. Safe to repeat; known paths are skipped. Returns how
    /// many devices were added.
    pub fn scan(&mut self) -> Result<usize> {
        let added = discovery::scan_bus(self.bus.as_ref(), &mut self.handles, self.probe)?;
        if added > 0 {
            info!("scan added {} device(s)", added);
        }
        Ok(added)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Iterate handles in registry order, newest first.
    pub fn list(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.handles.iter()
    }

    /// Look up a handle by its transport path.
    pub fn get(&self, path: &str) -> Option<&DeviceHandle> {
        self.handles.iter().find(|handle| handle.path() == path)
    }

    /// Mutable lookup by transport path.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut DeviceHandle> {
        self.handles.iter_mut().find(|handle| handle.path() == path)
    }

    /// Eagerly run the identification query on every handle, the batch
    /// flavor of session setup. Failures are logged and skipped.
    pub fn query_all(&mut self) {
        for handle in &mut self.handles {
            if let Err(err) = handle.ensure_queried() {
                warn!("query failed for {}: {}", handle.path(), err);
            }
        }
    }

    /// Find the first device matching the filters and reclaim its command
    /// interface. `None` filters match anything.
    ///
    /// Filtering on kind or serial needs board identity, so candidates are
    /// queried on the way; handles whose query fails are skipped, not
    /// fatal. Returns `Ok(None)` when nothing matches.
    pub fn open(
        &mut self,
        kind: Option<BoardKind>,
        serial: Option<u8>,
    ) -> Result<Option<&mut DeviceHandle>> {
        let mut matched = None;
        for index in 0..self.handles.len() {
            if (kind.is_some() || serial.is_some())
                && self.handles[index].ensure_queried().is_err()
            {
                continue;
            }
            let handle = &self.handles[index];
            let kind_ok =
                kind.is_none_or(|want| handle.profile().is_some_and(|p| p.board == want));
            let serial_ok =
                serial.is_none_or(|want| handle.profile().is_some_and(|p| p.serial == want));
            if kind_ok && serial_ok {
                matched = Some(index);
                break;
            }
        }

        match matched {
            Some(index) => {
                let handle = &mut self.handles[index];
                handle.reclaim()?;
                debug!("device {} opened", handle.path());
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    /// Reset the device at `path` and give up its interface without
    /// forgetting it. A later [`DeviceRegistry::open`] reclaims it.
    pub fn release(&mut self, path: &str) -> Result<()> {
        match self.get_mut(path) {
            Some(handle) => handle.release(),
            None => Err(Error::UnknownDevice {
                path: path.to_string(),
            }),
        }
    }

    /// Release, close, and forget the device at `path`. Any notification
    /// callback it had is dropped as well.
    pub fn destroy(&mut self, path: &str) -> Result<()> {
        let index = self
            .handles
            .iter()
            .position(|handle| handle.path() == path)
            .ok_or_else(|| Error::UnknownDevice {
                path: path.to_string(),
            })?;

        self.poller.unregister(path);
        let mut handle = self.handles.remove(index);
        if let Err(err) = handle.release() {
            warn!("release during destroy failed for {}: {}", path, err);
        }
        debug!("device {} destroyed", path);
        Ok(())
    }

    /// Register a notification callback for the device at `path`. Starts
    /// the shared poller thread on first use. A device carries at most one
    /// callback; a second registration is rejected.
    pub fn register_callback(&self, path: &str, callback: NotificationCallback) -> Result<()> {
        let handle = self.get(path).ok_or_else(|| Error::UnknownDevice {
            path: path.to_string(),
        })?;
        self.poller
            .register(handle.path().to_string(), handle.port(), callback)
    }

    /// Remove the notification callback for `path`, if any.
    pub fn unregister_callback(&self, path: &str) {
        self.poller.unregister(path);
    }

    /// Release every device and stop the poller thread. Runs from `Drop`
    /// too, so calling it explicitly is optional.
    pub fn shutdown(&mut self) {
        let count = self.handles.len();
        for mut handle in self.handles.drain(..) {
            self.poller.unregister(handle.path());
            if let Err(err) = handle.release() {
                warn!("release during shutdown failed for {}: {}", handle.path(), err);
            }
        }
        self.poller.stop();
        if count > 0 {
            info!("registry shut down, {} device(s) released", count);
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
