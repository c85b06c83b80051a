//! Non-blocking PTP management client: cycles through `PORT_DATA_SET` and
//! `TIME_PROPERTIES_DATA_SET` over a transport the core never constructs
//! bytes for directly — [`ManagementTransport`] hands back already-decoded
//! [`DecodedMessage`]s, and [`decode_management_tlv`] is the one place that
//! casts a raw TLV payload into a typed variant.

use crate::error::SessionError;

const PORT_STATE_MASTER: u8 = 6;
const PORT_STATE_SLAVE: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    PortDs,
    TimePropsDs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    PortDs,
    TimePropsDs,
    Done,
}

/// A management response, decoded once at the transport boundary so every
/// unsafe/pointer-cast concern stays out of the cursor state machine.
#[derive(Debug, Clone, Copy)]
pub enum DecodedMessage {
    PortDs { port_state: u8 },
    TimePropsDs { current_utc_offset: i16, leap61: bool, leap59: bool },
    /// Valid management RESPONSE, but not the dataset currently requested —
    /// dropped by the caller, cursor unchanged.
    Other,
}

/// Decodes a raw management response: a single byte selects which payload
/// follows (`0 = PortDs(port_state)`, `1 = TimePropsDs(offset_hi, offset_lo,
/// flags)`), matching the single-TLV-per-response shape the real PTP
/// management protocol's RESPONSE action carries.
pub fn decode_management_tlv(buf: &[u8]) -> Result<DecodedMessage, SessionError> {
    use byteorder::{BigEndian, ByteOrder};

    match buf.first() {
        Some(0) if buf.len() >= 2 => Ok(DecodedMessage::PortDs { port_state: buf[1] }),
        Some(1) if buf.len() >= 5 => {
            let current_utc_offset = BigEndian::read_i16(&buf[1..3]);
            let flags = buf[3];
            Ok(DecodedMessage::TimePropsDs {
                current_utc_offset,
                leap61: flags & 0x01 != 0,
                leap59: flags & 0x02 != 0,
            })
        }
        Some(_) => Ok(DecodedMessage::Other),
        None => Err(SessionError::MgmtProtocol("empty management response".into())),
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ManagementTransport {
    fn send_get(&mut self, dataset: Dataset) -> Result<(), SessionError>;
    /// Non-blocking poll with a caller-supplied timeout; `Ok(None)` on
    /// timeout/no-data.
    fn poll_recv(&mut self, timeout_ms: i32) -> Result<Option<DecodedMessage>, SessionError>;
}

impl ManagementTransport for Box<dyn ManagementTransport> {
    fn send_get(&mut self, dataset: Dataset) -> Result<(), SessionError> {
        (**self).send_get(dataset)
    }

    fn poll_recv(&mut self, timeout_ms: i32) -> Result<Option<DecodedMessage>, SessionError> {
        (**self).poll_recv(timeout_ms)
    }
}

/// Decoded `TIME_PROPERTIES_DATA_SET` fields the leap coordinator needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeProperties {
    pub sync_offset_seconds: i32,
    pub leap_pending: i8,
}

pub struct ManagementClient<T: ManagementTransport> {
    transport: T,
    wait_sync: bool,
    get_utc_offset: bool,
    cursor: Cursor,
    request_in_flight: bool,
    pub port_synced: bool,
    pub time_properties: TimeProperties,
}

impl<T: ManagementTransport> ManagementClient<T> {
    pub fn new(transport: T, wait_sync: bool, get_utc_offset: bool) -> Self {
        ManagementClient {
            transport,
            wait_sync,
            get_utc_offset,
            cursor: Self::initial_cursor(wait_sync, get_utc_offset),
            request_in_flight: false,
            port_synced: false,
            time_properties: TimeProperties::default(),
        }
    }

    fn initial_cursor(wait_sync: bool, get_utc_offset: bool) -> Cursor {
        if wait_sync {
            Cursor::PortDs
        } else if get_utc_offset {
            Cursor::TimePropsDs
        } else {
            Cursor::Done
        }
    }

    fn advance_from(&mut self) {
        self.cursor = match self.cursor {
            Cursor::PortDs if self.get_utc_offset => Cursor::TimePropsDs,
            Cursor::PortDs | Cursor::TimePropsDs => Cursor::Done,
            Cursor::Done => Cursor::Done,
        };
        self.request_in_flight = false;
    }

    /// Runs one non-blocking step. `Ok(true)` once the whole cycle (both
    /// required datasets) has completed; the cursor then resets for the
    /// next round. `Ok(false)` means "call again".
    pub fn poll_round(&mut self, timeout_ms: i32) -> Result<bool, SessionError> {
        let dataset = match self.cursor {
            Cursor::Done => {
                self.cursor = Self::initial_cursor(self.wait_sync, self.get_utc_offset);
                return Ok(true);
            }
            Cursor::PortDs => Dataset::PortDs,
            Cursor::TimePropsDs => Dataset::TimePropsDs,
        };

        if !self.request_in_flight {
            self.transport.send_get(dataset)?;
            self.request_in_flight = true;
        }

        match self.transport.poll_recv(timeout_ms) {
            Ok(None) => {
                self.request_in_flight = false;
                Err(SessionError::MgmtTimeout)
            }
            Ok(Some(DecodedMessage::PortDs { port_state })) if dataset == Dataset::PortDs => {
                if port_state == PORT_STATE_MASTER || port_state == PORT_STATE_SLAVE {
                    self.port_synced = true;
                    self.advance_from();
                }
                // Any other port state leaves the cursor pinned on PortDs.
                Ok(false)
            }
            Ok(Some(DecodedMessage::TimePropsDs {
                current_utc_offset,
                leap61,
                leap59,
            })) if dataset == Dataset::TimePropsDs => {
                self.time_properties = TimeProperties {
                    sync_offset_seconds: current_utc_offset as i32,
                    leap_pending: if leap61 {
                        1
                    } else if leap59 {
                        -1
                    } else {
                        0
                    },
                };
                self.advance_from();
                Ok(false)
            }
            Ok(Some(DecodedMessage::Other)) | Ok(Some(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
