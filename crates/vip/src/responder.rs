//! VIP lifecycle and request dispatch.
//!
//! A `Responder` owns the interface registry, the VIP registry and both
//! listeners. Listeners are created lazily on the first lifecycle call and
//! each runs one accept loop on its own thread until process exit.

use crate::arp::{Arp4Listener, ArpRequest};
use crate::interface::InterfaceRegistry;
use crate::ndp::{Nd6Listener, NdRequest};
use crate::registry::{GroupRefCounter, GroupTransition, VipRegistry};
use crate::types::{canonical_key, solicited_node_multicast, VirtualIpAddress};
use common::{Error, Result};
use std::net::IpAddr;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error, warn};

/// Platform address-configuration tool
const IP_COMMAND: &str = "/usr/sbin/ip";

/// Device VIPs are bound to
const LOOPBACK_DEVICE: &str = "lo";

/// Startup configuration for a responder.
#[derive(Debug, Clone, Default)]
pub struct ResponderConfig {
    /// Interfaces eligible to answer for VIPs; the first registered is the
    /// source of gratuitous announcements.
    pub interfaces: Vec<String>,

    /// Addresses to bind and announce at startup.
    pub virtual_ips: Vec<String>,
}

impl ResponderConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for name in &self.interfaces {
            if name.trim().is_empty() {
                return Err(Error::interface("empty interface name"));
            }
        }
        for address in &self.virtual_ips {
            VirtualIpAddress::parse(address)?;
        }
        Ok(())
    }
}

/// The VIP responder.
#[derive(Default)]
pub struct Responder {
    interfaces: Arc<InterfaceRegistry>,
    vips: Arc<VipRegistry>,
    groups: GroupRefCounter,
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct Listeners {
    arp: Option<Arc<Arp4Listener>>,
    ndp: Option<Arc<Nd6Listener>>,
}

impl Responder {
    /// Create a responder with no registered interfaces and no VIPs.
    /// Listener sockets are opened on the first lifecycle call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a responder from a startup configuration: register each
    /// interface, then add and enable each VIP.
    pub fn from_config(config: &ResponderConfig) -> Result<Self> {
        config.validate()?;

        let responder = Self::new();
        for name in &config.interfaces {
            responder.vip_interface(name)?;
        }
        for address in &config.virtual_ips {
            responder.add(address)?;
            responder.enable(address)?;
        }
        Ok(responder)
    }

    /// Register an interface as eligible to answer for VIPs. Idempotent by
    /// name.
    pub fn vip_interface(&self, name: &str) -> Result<()> {
        self.interfaces.register(name)
    }

    /// Bind a VIP to the loopback device.
    pub fn add(&self, address: &str) -> Result<()> {
        let vip = VirtualIpAddress::parse(address)?;
        self.ensure_listeners()?;

        loopback_tool("add", &vip);
        Ok(())
    }

    /// Unbind a VIP from the loopback device. Idempotent.
    pub fn delete(&self, address: &str) -> Result<()> {
        let vip = VirtualIpAddress::parse(address)?;
        self.ensure_listeners()?;

        loopback_tool("del", &vip);
        Ok(())
    }

    /// Register a VIP and announce ownership.
    pub fn enable(&self, address: &str) -> Result<()> {
        let vip = VirtualIpAddress::parse(address)?;
        let (arp, ndp) = self.ensure_listeners()?;

        // Register before announcing, so a solicited query racing the
        // announcement is not dropped.
        self.vips.insert(vip.clone());

        match vip.ip() {
            IpAddr::V6(ip) => {
                if self.groups.join(ip) == GroupTransition::Joined {
                    let if_index = self.interfaces.first().map(|i| i.index).unwrap_or(0);
                    if let Err(e) = ndp.join_group(solicited_node_multicast(&ip), if_index) {
                        warn!(vip = %vip, error = %e, "failed to join solicited-node group");
                    }
                }
                if let Err(e) = ndp.gratuitous(ip) {
                    warn!(vip = %vip, error = %e, "failed to send unsolicited advertisement");
                }
                Ok(())
            }
            IpAddr::V4(ip) => arp.gratuitous(ip),
        }
    }

    /// Unregister a VIP and stop answering for it. The loopback binding is
    /// left alone; that is `delete`'s job.
    pub fn disable(&self, address: &str) -> Result<()> {
        let vip = VirtualIpAddress::parse(address)?;
        let (_, ndp) = self.ensure_listeners()?;

        self.vips.remove(vip.canonical());

        if let IpAddr::V6(ip) = vip.ip() {
            if self.groups.leave(ip) == GroupTransition::Left {
                let if_index = self.interfaces.first().map(|i| i.index).unwrap_or(0);
                if let Err(e) = ndp.leave_group(solicited_node_multicast(&ip), if_index) {
                    warn!(vip = %vip, error = %e, "failed to leave solicited-node group");
                }
            }
        }
        Ok(())
    }

    /// Create both listeners and their accept threads on first use.
    fn ensure_listeners(&self) -> Result<(Arc<Arp4Listener>, Arc<Nd6Listener>)> {
        let mut listeners = self.listeners.lock().unwrap();

        let ndp = match &listeners.ndp {
            Some(ndp) => ndp.clone(),
            None => {
                let ndp = Arc::new(Nd6Listener::new(self.interfaces.clone())?);
                self.spawn_listener(ndp.clone());
                listeners.ndp = Some(ndp.clone());
                ndp
            }
        };

        let arp = match &listeners.arp {
            Some(arp) => arp.clone(),
            None => {
                let arp = Arc::new(Arp4Listener::new(self.interfaces.clone())?);
                self.spawn_listener(arp.clone());
                listeners.arp = Some(arp.clone());
                arp
            }
        };

        Ok((arp, ndp))
    }

    fn spawn_listener<L: Listener>(&self, listener: Arc<L>) {
        let vips = self.vips.clone();
        let interfaces = self.interfaces.clone();
        thread::spawn(move || run_listener(listener, vips, interfaces));
    }
}

/// One accept loop: filter requests against the VIP registry and the
/// eligible interfaces, answer the rest.
fn run_listener<L: Listener>(
    listener: Arc<L>,
    vips: Arc<VipRegistry>,
    interfaces: Arc<InterfaceRegistry>,
) {
    loop {
        let request = match listener.accept() {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "listener failed, stopping");
                return;
            }
        };

        if !should_answer(request.target(), request.if_index(), &vips, &interfaces) {
            continue;
        }

        if let Err(e) = listener.reply(&request) {
            warn!(addr = %request.target(), error = %e, "failed to send reply");
        }
    }
}

/// The dispatch predicate: the target must be an enabled VIP, and the
/// arrival interface must be eligible unless no interface is registered.
fn should_answer(
    target: IpAddr,
    if_index: u32,
    vips: &VipRegistry,
    interfaces: &InterfaceRegistry,
) -> bool {
    if !vips.contains(&canonical_key(target)) {
        return false;
    }
    interfaces.is_empty() || interfaces.contains_index(if_index)
}

trait Listener: Send + Sync + 'static {
    type Request: Request;

    fn accept(&self) -> Result<Self::Request>;
    fn reply(&self, request: &Self::Request) -> Result<()>;
}

trait Request {
    fn target(&self) -> IpAddr;
    fn if_index(&self) -> u32;
}

impl Listener for Arp4Listener {
    type Request = ArpRequest;

    fn accept(&self) -> Result<ArpRequest> {
        Arp4Listener::accept(self)
    }

    fn reply(&self, request: &ArpRequest) -> Result<()> {
        Arp4Listener::reply(self, request)
    }
}

impl Request for ArpRequest {
    fn target(&self) -> IpAddr {
        IpAddr::V4(ArpRequest::target(self))
    }

    fn if_index(&self) -> u32 {
        ArpRequest::if_index(self)
    }
}

impl Listener for Nd6Listener {
    type Request = NdRequest;

    fn accept(&self) -> Result<NdRequest> {
        Nd6Listener::accept(self)
    }

    fn reply(&self, request: &NdRequest) -> Result<()> {
        Nd6Listener::reply(self, request)
    }
}

impl Request for NdRequest {
    fn target(&self) -> IpAddr {
        IpAddr::V6(NdRequest::target(self))
    }

    fn if_index(&self) -> u32 {
        NdRequest::if_index(self)
    }
}

/// Drive the platform address tool. Failures are logged and swallowed: the
/// kernel may already be in the desired state.
fn loopback_tool(action: &str, vip: &VirtualIpAddress) {
    let address = format!("{}/{}", vip.canonical(), vip.prefix_len());

    let status = Command::new(IP_COMMAND)
        .args(["address", action, address.as_str(), "dev", LOOPBACK_DEVICE])
        .status();

    match status {
        Ok(status) if !status.success() => {
            debug!(%address, action, code = ?status.code(), "address tool exited nonzero");
        }
        Ok(_) => {}
        Err(e) => warn!(%address, action, error = %e, "failed to run address tool"),
    }
}
