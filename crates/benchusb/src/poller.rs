//! Background notification poller
//!
//! Boards push unsolicited notifications on the interrupt-IN endpoint:
//! a sub-type tag byte first, payload after. One lazily spawned thread
//! services every device whose owner registered a callback, keeping one
//! interrupt read armed per device and re-arming it right after each
//! delivery. The thread parks in short reads so shutdown never waits for
//! a notification that may never come.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::bus::{DevicePort, TransportError};
use crate::error::{Error, Result};

/// Interrupt-IN endpoint notifications arrive on.
const NOTIFY_ENDPOINT: u8 = 0x81;
/// Largest notification frame the firmware sends.
const NOTIFY_BUFFER_LEN: usize = 20;
/// Per-read wait; short so shutdown and new registrations are noticed
/// quickly.
const READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Sleep between passes when no listener delivered anything.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Callback invoked with the notification tag byte and payload.
pub type NotificationCallback = Box<dyn FnMut(u8, &[u8]) + Send>;

enum PollerMessage {
    Register {
        path: String,
        port: Arc<dyn DevicePort>,
        callback: NotificationCallback,
    },
    Unregister {
        path: String,
    },
}

struct Listener {
    path: String,
    port: Arc<dyn DevicePort>,
    callback: NotificationCallback,
}

struct PollerShared {
    registered: HashSet<String>,
    sender: Option<Sender<PollerMessage>>,
    thread: Option<JoinHandle<()>>,
}

/// Owner-side handle to the shared poller thread.
pub struct NotificationPoller {
    running: Arc<AtomicBool>,
    shared: Mutex<PollerShared>,
}

impl NotificationPoller {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            shared: Mutex::new(PollerShared {
                registered: HashSet::new(),
                sender: None,
                thread: None,
            }),
        }
    }

    /// Register a callback for a device, spawning the thread on first
    /// use. Each device carries at most one callback.
    pub(crate) fn register(
        &self,
        path: String,
        port: Arc<dyn DevicePort>,
        callback: NotificationCallback,
    ) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.registered.contains(&path) {
            return Err(Error::CallbackAlreadyRegistered);
        }

        if shared.thread.is_none() {
            let (sender, receiver) = mpsc::channel();
            self.running.store(true, Ordering::Release);
            let running = Arc::clone(&self.running);
            let thread = std::thread::Builder::new()
                .name("benchusb-notify".to_string())
                .spawn(move || poll_loop(receiver, running))
                .expect("failed to spawn notification poller thread");
            shared.sender = Some(sender);
            shared.thread = Some(thread);
            info!("notification poller started");
        }

        debug!("notification callback registered for {}", path);
        shared.registered.insert(path.clone());
        if let Some(sender) = &shared.sender {
            let _ = sender.send(PollerMessage::Register {
                path,
                port,
                callback,
            });
        }
        Ok(())
    }

    /// Drop a device's registration, if present.
    pub(crate) fn unregister(&self, path: &str) {
        let mut shared = self.shared.lock().unwrap();
        if shared.registered.remove(path) {
            debug!("notification callback removed for {}", path);
            if let Some(sender) = &shared.sender {
                let _ = sender.send(PollerMessage::Unregister {
                    path: path.to_string(),
                });
            }
        }
    }

    /// Stop the thread and wait for it to exit. Idempotent.
    pub(crate) fn stop(&self) {
        let thread = {
            let mut shared = self.shared.lock().unwrap();
            shared.registered.clear();
            shared.sender = None;
            shared.thread.take()
        };

        if let Some(thread) = thread {
            self.running.store(false, Ordering::Release);
            if thread.join().is_err() {
                warn!("notification poller thread panicked");
            }
            info!("notification poller stopped");
        }
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(receiver: Receiver<PollerMessage>, running: Arc<AtomicBool>) {
    let mut listeners: Vec<Listener> = Vec::new();
    debug!("notification poll loop running");

    while running.load(Ordering::Acquire) {
        loop {
            match receiver.try_recv() {
                Ok(PollerMessage::Register {
                    path,
                    port,
                    callback,
                }) => {
                    listeners.push(Listener {
                        path,
                        port,
                        callback,
                    });
                }
                Ok(PollerMessage::Unregister { path }) => {
                    listeners.retain(|listener| listener.path != path);
                }
                Err(TryRecvError::Empty) => break,
                // Owner gone; nothing left to poll for.
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let mut delivered = false;
        let mut buffer = [0u8; NOTIFY_BUFFER_LEN];
        for listener in &mut listeners {
            match listener
                .port
                .read_interrupt(NOTIFY_ENDPOINT, &mut buffer, READ_TIMEOUT)
            {
                Ok(len) if len > 0 => {
                    let tag = buffer[0];
                    trace!(
                        "notification from {}: tag 0x{:02x}, {} byte(s)",
                        listener.path, tag, len
                    );
                    (listener.callback)(tag, &buffer[1..len]);
                    delivered = true;
                }
                Ok(_) => {}
                Err(TransportError::Timeout) => {
                    // Nothing pending; the next pass re-arms the read.
                }
                Err(err) => {
                    trace!("interrupt read failed for {}: {}", listener.path, err);
                }
            }
        }

        if !delivered {
            std::thread::sleep(IDLE_WAIT);
        }
    }

    debug!("notification poll loop exited");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::bus::BusDevice;
    use crate::driver::PIC_SIGNATURE;
    use crate::mock::{FirmwareModel, MockDevice};

    fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    #[test]
    fn test_delivery_splits_tag_from_payload() {
        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1));
        let port = device.open().unwrap();
        let seen: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

        let poller = NotificationPoller::new();
        let sink = Arc::clone(&seen);
        poller
            .register(
                "usb:1:4".to_string(),
                port,
                Box::new(move |tag, payload| {
                    sink.lock().unwrap().push((tag, payload.to_vec()));
                }),
            )
            .unwrap();

        device.push_notification(vec![0x07, 0xaa, 0xbb]);
        assert!(wait_until(Duration::from_secs(1), || {
            !seen.lock().unwrap().is_empty()
        }));
        assert_eq!(seen.lock().unwrap()[0], (0x07, vec![0xaa, 0xbb]));

        // The read re-arms: a second frame arrives through the same
        // callback.
        device.push_notification(vec![0x08]);
        assert!(wait_until(Duration::from_secs(1), || {
            seen.lock().unwrap().len() == 2
        }));
        assert_eq!(seen.lock().unwrap()[1], (0x08, Vec::new()));

        poller.stop();
    }

    #[test]
    fn test_oversized_frame_is_dropped_without_delivery() {
        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1));
        let port = device.open().unwrap();
        let seen: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

        let poller = NotificationPoller::new();
        let sink = Arc::clone(&seen);
        poller
            .register(
                "usb:1:4".to_string(),
                port,
                Box::new(move |tag, payload| {
                    sink.lock().unwrap().push((tag, payload.to_vec()));
                }),
            )
            .unwrap();

        // A frame larger than any the firmware sends must never reach the
        // callback, truncated or otherwise. The read stays armed for the
        // well-formed frame behind it.
        device.push_notification(vec![0xaa; NOTIFY_BUFFER_LEN + 5]);
        device.push_notification(vec![0x07, 0x01]);
        assert!(wait_until(Duration::from_secs(1), || {
            !seen.lock().unwrap().is_empty()
        }));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0], (0x07, vec![0x01]));

        poller.stop();
    }

    #[test]
    fn test_second_registration_is_rejected() {
        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1));
        let port = device.open().unwrap();

        let poller = NotificationPoller::new();
        poller
            .register("usb:1:4".to_string(), Arc::clone(&port), Box::new(|_, _| {}))
            .unwrap();
        let err = poller
            .register("usb:1:4".to_string(), port, Box::new(|_, _| {}))
            .unwrap_err();
        assert!(matches!(err, Error::CallbackAlreadyRegistered));

        poller.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let poller = NotificationPoller::new();
        poller.stop();

        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1));
        poller
            .register("usb:1:4".to_string(), device.open().unwrap(), Box::new(|_, _| {}))
            .unwrap();
        poller.stop();
        poller.stop();
    }

    #[test]
    fn test_unregister_then_register_again() {
        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1));
        let port = device.open().unwrap();

        let poller = NotificationPoller::new();
        poller
            .register("usb:1:4".to_string(), Arc::clone(&port), Box::new(|_, _| {}))
            .unwrap();
        poller.unregister("usb:1:4");
        poller
            .register("usb:1:4".to_string(), port, Box::new(|_, _| {}))
            .unwrap();

        poller.stop();
    }
}
