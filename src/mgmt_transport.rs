//! Unix-datagram [`ManagementTransport`] to a local PTP management endpoint.
//!
//! The real PTP management protocol's TLV wire format is explicitly out of
//! scope for this crate — the core only ever sees [`DecodedMessage`]. This
//! transport speaks the minimal single-byte-tagged request/response shape
//! [`crate::mgmt::decode_management_tlv`] already decodes: byte 0 selects
//! the dataset being requested (`0 = PORT_DATA_SET`, `1 =
//! TIME_PROPERTIES_DATA_SET`), and the peer is expected to reply in kind.

use crate::error::SessionError;
use crate::mgmt::{decode_management_tlv, DecodedMessage, Dataset, ManagementTransport};
use nix::poll::{poll, PollFd, PollFlags};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixDatagram;
use std::path::Path;

pub struct UdsManagementTransport {
    socket: UnixDatagram,
}

impl UdsManagementTransport {
    /// Binds an ephemeral (process-unique) client path and connects it to
    /// `server_path`, the well-known management endpoint a local PTP daemon
    /// listens on.
    pub fn connect(server_path: &str) -> Result<Self, SessionError> {
        let client_path = format!("{server_path}.{}", std::process::id());
        let _ = std::fs::remove_file(&client_path);
        let socket = UnixDatagram::bind(&client_path).map_err(|e| {
            SessionError::ConfigurationInvalid(format!(
                "cannot bind management client socket at {client_path}: {e}"
            ))
        })?;
        socket.connect(Path::new(server_path)).map_err(|e| {
            SessionError::ConfigurationInvalid(format!(
                "cannot connect to management socket {server_path}: {e}"
            ))
        })?;
        socket.set_nonblocking(true).map_err(|e| {
            SessionError::ConfigurationInvalid(format!("cannot set management socket non-blocking: {e}"))
        })?;
        Ok(UdsManagementTransport { socket })
    }
}

impl Drop for UdsManagementTransport {
    fn drop(&mut self) {
        if let Ok(addr) = self.socket.local_addr() {
            if let Some(path) = addr.as_pathname() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

impl ManagementTransport for UdsManagementTransport {
    fn send_get(&mut self, dataset: Dataset) -> Result<(), SessionError> {
        let tag: u8 = match dataset {
            Dataset::PortDs => 0,
            Dataset::TimePropsDs => 1,
        };
        self.socket
            .send(&[tag])
            .map_err(|e| SessionError::MgmtProtocol(format!("send_get failed: {e}")))?;
        Ok(())
    }

    fn poll_recv(&mut self, timeout_ms: i32) -> Result<Option<DecodedMessage>, SessionError> {
        let fd: BorrowedFd = self.socket.as_fd();
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let n = poll(&mut fds, timeout_ms).map_err(|e| {
            SessionError::MgmtProtocol(format!("poll on management socket failed: {e}"))
        })?;
        if n == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; 64];
        match self.socket.recv(&mut buf) {
            Ok(len) => decode_management_tlv(&buf[..len]).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SessionError::MgmtProtocol(format!("recv failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds a throwaway "server" socket under a fresh tempdir so the
    /// client/server pair doesn't collide with a real PTP daemon's
    /// well-known endpoint or with other tests running concurrently.
    fn server_path() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("create tempdir for management socket");
        let path = dir.path().join("mgmt.sock");
        (dir, path.to_str().unwrap().to_string())
    }

    #[test]
    fn round_trips_a_port_ds_request_and_response() {
        let (_dir, server_path) = server_path();
        let server = UnixDatagram::bind(&server_path).unwrap();

        let mut client = UdsManagementTransport::connect(&server_path).unwrap();
        client.send_get(Dataset::PortDs).unwrap();

        let mut buf = [0u8; 64];
        let (len, peer) = server.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0u8]);

        server.send_to(&[0u8, 9u8], &peer).unwrap(); // PortDs, SLAVE
        match client.poll_recv(1000).unwrap() {
            Some(DecodedMessage::PortDs { port_state }) => assert_eq!(port_state, 9),
            other => panic!("expected PortDs, got {other:?}"),
        }
    }

    #[test]
    fn poll_recv_times_out_when_nothing_arrives() {
        let (_dir, server_path) = server_path();
        let _server = UnixDatagram::bind(&server_path).unwrap(); // keep the peer alive

        let mut client = UdsManagementTransport::connect(&server_path).unwrap();
        assert!(client.poll_recv(50).unwrap().is_none());
    }

    #[test]
    fn client_socket_path_is_removed_on_drop() {
        let (_dir, server_path) = server_path();
        let _server = UnixDatagram::bind(&server_path).unwrap();

        let client = UdsManagementTransport::connect(&server_path).unwrap();
        let client_path = client.socket.local_addr().unwrap().as_pathname().unwrap().to_path_buf();
        assert!(client_path.exists());
        drop(client);
        assert!(!client_path.exists());
    }
}
