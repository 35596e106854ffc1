//! Raw link-layer frame I/O.
//!
//! Provides a trait-based abstraction over the datalink channel to enable:
//! - Testing the scanner and block loop without real network interfaces
//! - Different capture backends
//!
//! The pnet channel owns the underlying packet socket; dropping either half
//! closes it, so the socket is released on every exit path.

use std::io;
use std::time::Duration;

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};

use crate::error::{NetworkError, Result};

/// Trait for frame receiving implementations.
pub trait FrameReceiver: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the read timeout elapsed without traffic.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Trait for frame sending implementations.
pub trait FrameSender: Send {
    /// Send a frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// Find a network interface by name.
pub fn find_interface(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| NetworkError::NoSuchInterface(name.to_owned()).into())
}

/// Production frame capture using pnet.
pub struct PnetCapture {
    rx: Box<dyn DataLinkReceiver>,
}

impl PnetCapture {
    /// Open a channel on the given interface.
    ///
    /// `read_timeout` bounds every [`FrameReceiver::next_frame`] call.
    pub fn open(
        interface: &NetworkInterface,
        read_timeout: Duration,
    ) -> Result<(Self, PnetSender)> {
        let config = datalink::Config {
            read_timeout: Some(read_timeout),
            ..datalink::Config::default()
        };

        let (tx, rx) = match datalink::channel(interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(NetworkError::UnsupportedChannel.into()),
            Err(e) => return Err(classify_open_error(&interface.name, &e).into()),
        };

        Ok((Self { rx }, PnetSender { tx }))
    }
}

/// Map a channel open failure onto the error taxonomy.
fn classify_open_error(interface: &str, err: &io::Error) -> NetworkError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => NetworkError::PermissionDenied {
            interface: interface.to_owned(),
        },
        io::ErrorKind::AddrInUse => NetworkError::AddressInUse {
            interface: interface.to_owned(),
        },
        _ => match err.raw_os_error() {
            Some(libc::EPERM) => NetworkError::PermissionDenied {
                interface: interface.to_owned(),
            },
            Some(libc::ENODEV | libc::ENXIO) => {
                NetworkError::NoSuchInterface(interface.to_owned())
            }
            _ => NetworkError::ChannelOpen(format!("{interface}: {err}")),
        },
    }
}

impl FrameReceiver for PnetCapture {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string()).into()),
        }
    }
}

/// Production frame sender using pnet.
pub struct PnetSender {
    tx: Box<dyn DataLinkSender>,
}

impl FrameSender for PnetSender {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.tx
            .send_to(frame, None)
            .ok_or_else(|| NetworkError::SendFailed("send returned None".into()))?
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock frame capture for testing.
    ///
    /// Yields the queued frames, then reports a timeout on every call.
    pub struct MockCapture {
        frames: VecDeque<Vec<u8>>,
        pub polls: usize,
    }

    impl MockCapture {
        pub fn new(frames: Vec<Vec<u8>>) -> Self {
            Self {
                frames: frames.into(),
                polls: 0,
            }
        }
    }

    impl FrameReceiver for MockCapture {
        fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
            self.polls += 1;
            Ok(self.frames.pop_front())
        }
    }

    /// Mock frame sender for testing.
    #[derive(Clone, Default)]
    pub struct MockSender {
        pub sent_frames: Arc<Mutex<Vec<Vec<u8>>>>,
        attempts: Arc<AtomicUsize>,
        fail: bool,
    }

    impl MockSender {
        pub fn new() -> Self {
            Self::default()
        }

        /// A sender whose every send fails.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Every call to `send`, failed ones included.
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn sent_count(&self) -> usize {
            self.sent_frames.lock().unwrap().len()
        }

        pub fn last_sent(&self) -> Option<Vec<u8>> {
            self.sent_frames.lock().unwrap().last().cloned()
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent_frames.lock().unwrap().clone()
        }
    }

    impl FrameSender for MockSender {
        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NetworkError::SendFailed("mock failure".into()).into());
            }
            self.sent_frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_mock_capture() {
        let frames = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let mut capture = MockCapture::new(frames);

        assert_eq!(capture.next_frame().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(capture.next_frame().unwrap(), Some(vec![4, 5, 6]));
        assert_eq!(capture.next_frame().unwrap(), None);
        assert_eq!(capture.polls, 3);
    }

    #[test]
    fn test_mock_sender() {
        let mut sender = MockSender::new();

        sender.send(&[1, 2, 3]).unwrap();
        assert_eq!(sender.sent_count(), 1);

        sender.send(&[4, 5, 6]).unwrap();
        assert_eq!(sender.sent_count(), 2);
        assert_eq!(sender.last_sent(), Some(vec![4, 5, 6]));
    }

    #[test]
    fn test_failing_sender_counts_attempts() {
        let mut sender = MockSender::failing();

        assert!(sender.send(&[1, 2, 3]).is_err());
        assert!(sender.send(&[4, 5, 6]).is_err());
        assert_eq!(sender.attempts(), 2);
        assert_eq!(sender.sent_count(), 0);
    }

    #[test]
    fn test_unknown_interface_is_reported() {
        let result = find_interface("definitely-not-an-interface0");
        assert!(matches!(
            result,
            Err(crate::Error::Network(NetworkError::NoSuchInterface(name)))
                if name == "definitely-not-an-interface0"
        ));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            classify_open_error("wlan0", &err),
            NetworkError::PermissionDenied { interface } if interface == "wlan0"
        ));

        let err = io::Error::from_raw_os_error(libc::EPERM);
        assert!(matches!(
            classify_open_error("wlan0", &err),
            NetworkError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_classify_address_in_use_and_missing_device() {
        let err = io::Error::from(io::ErrorKind::AddrInUse);
        assert!(matches!(
            classify_open_error("eth0", &err),
            NetworkError::AddressInUse { .. }
        ));

        let err = io::Error::from_raw_os_error(libc::ENODEV);
        assert!(matches!(
            classify_open_error("eth9", &err),
            NetworkError::NoSuchInterface(name) if name == "eth9"
        ));

        let err = io::Error::other("boom");
        assert!(matches!(
            classify_open_error("eth0", &err),
            NetworkError::ChannelOpen(_)
        ));
    }
}
