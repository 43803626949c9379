//! Network interface resolution and the eligible-interface registry.

use common::{Error, Result};
use std::ffi::{CStr, CString};
use std::io;
use std::sync::RwLock;

/// A resolved physical interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub index: u32,
    pub hardware_addr: [u8; 6],
}

/// Resolve an interface by name.
pub fn by_name(name: &str) -> Result<NetInterface> {
    let name = name.trim();
    let index = interface_index(name)?;

    Ok(NetInterface {
        name: name.to_string(),
        index,
        hardware_addr: hardware_address(name)?,
    })
}

/// Resolve an interface by kernel index.
pub fn by_index(index: u32) -> Result<NetInterface> {
    let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];

    let ret = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ret.is_null() {
        return Err(Error::interface(format!("no interface with index {}", index)));
    }

    let name = unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Ok(NetInterface {
        hardware_addr: hardware_address(&name)?,
        index,
        name,
    })
}

/// Get the interface index for a given interface name.
fn interface_index(name: &str) -> Result<u32> {
    let c_name =
        CString::new(name).map_err(|_| Error::interface(format!("invalid name {:?}", name)))?;

    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        Err(Error::interface(format!("interface {} not found", name)))
    } else {
        Ok(index)
    }
}

/// Get the hardware address of an interface via SIOCGIFHWADDR.
fn hardware_address(name: &str) -> Result<[u8; 6]> {
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };

    let name_bytes = name.as_bytes();
    if name_bytes.len() >= libc::IFNAMSIZ {
        return Err(Error::interface(format!("interface name {} too long", name)));
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
        *dst = *src as libc::c_char;
    }

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let rc = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut ifr) };
    let ioctl_err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if rc < 0 {
        return Err(Error::interface(format!(
            "failed to read hardware address of {}: {}",
            name, ioctl_err
        )));
    }

    let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
    let mut addr = [0u8; 6];
    for (dst, src) in addr.iter_mut().zip(&sa_data[..6]) {
        *dst = *src as u8;
    }
    Ok(addr)
}

/// Insertion-ordered registry of interfaces eligible to answer for VIPs.
///
/// Deduplicated by name and never shrinks. Element `[0]` is the source
/// interface for gratuitous announcements.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: RwLock<Vec<NetInterface>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` and append it to the registry. Registering the same
    /// name twice is a no-op.
    pub fn register(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let mut interfaces = self.interfaces.write().unwrap();

        if interfaces.iter().any(|i| i.name == name) {
            return Ok(());
        }

        interfaces.push(by_name(name)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.read().unwrap().is_empty()
    }

    /// Whether an interface with the given kernel index is registered.
    pub fn contains_index(&self, index: u32) -> bool {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .any(|i| i.index == index)
    }

    /// The first registered interface, if any.
    pub fn first(&self) -> Option<NetInterface> {
        self.interfaces.read().unwrap().first().cloned()
    }
}
