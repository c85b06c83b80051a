//! Network-interface-to-PHC discovery: resolves `--interface eth0` to a
//! `/dev/ptpN` device path via `SIOCETHTOOL`/`ETHTOOL_GET_TS_INFO`, the same
//! ioctl `phc2sys`'s `sk_get_ts_info` uses. Out of scope for the
//! synchronization core proper — this is the one piece of raw socket/ioctl
//! plumbing needed to make `--interface` usable end to end.

use crate::error::SessionError;
use std::mem;
use std::os::unix::io::RawFd;

const SIOCETHTOOL: libc::c_ulong = 0x8946;
const ETHTOOL_GET_TS_INFO: u32 = 0x00000041;
const IFNAMSIZ: usize = 16;

#[repr(C)]
struct EthtoolTsInfo {
    cmd: u32,
    so_timestamping: u32,
    phc_index: i32,
    tx_types: u32,
    tx_reserved: [u32; 3],
    rx_filters: u32,
    rx_reserved: [u32; 3],
}

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_data: *mut libc::c_void,
}

/// Resolves `interface` (e.g. `"eth0"`) to its PHC device path, by opening a
/// throwaway UDP socket purely to issue the `SIOCETHTOOL` ioctl on, matching
/// how the kernel scopes this query to a socket family rather than a file.
pub fn discover_phc_device(interface: &str) -> Result<String, SessionError> {
    if interface.len() >= IFNAMSIZ {
        return Err(SessionError::ConfigurationInvalid(format!(
            "interface name '{interface}' too long"
        )));
    }

    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(SessionError::ConfigurationInvalid(format!(
            "cannot open control socket for interface discovery: {}",
            std::io::Error::last_os_error()
        )));
    }
    let result = discover_with_socket(sock, interface);
    unsafe { libc::close(sock) };
    result
}

fn discover_with_socket(sock: RawFd, interface: &str) -> Result<String, SessionError> {
    let mut info: EthtoolTsInfo = unsafe { mem::zeroed() };
    info.cmd = ETHTOOL_GET_TS_INFO;

    let mut ifr: IfReq = unsafe { mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(interface.bytes()) {
        *dst = src as libc::c_char;
    }
    ifr.ifr_data = &mut info as *mut EthtoolTsInfo as *mut libc::c_void;

    let ret = unsafe { libc::ioctl(sock, SIOCETHTOOL as _, &mut ifr) };
    if ret < 0 {
        return Err(SessionError::ConfigurationInvalid(format!(
            "cannot query timestamping info for interface '{interface}': {}",
            std::io::Error::last_os_error()
        )));
    }

    if info.phc_index < 0 {
        return Err(SessionError::ConfigurationInvalid(format!(
            "interface '{interface}' doesn't have a PHC"
        )));
    }

    Ok(format!("/dev/ptp{}", info.phc_index))
}
