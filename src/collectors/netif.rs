use super::sources::{InterfaceAddr, InterfaceSource};
use super::{SampleError, Sampler};
use crate::state::{NetInterface, Snapshot};
use std::net::IpAddr;

// IFNAMSIZ minus the terminating NUL.
pub const MAX_IFNAME_BYTES: usize = 15;

fn bounded_name(name: &str) -> String {
    if name.len() <= MAX_IFNAME_BYTES {
        return name.to_string();
    }
    let mut end = MAX_IFNAME_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

pub fn ipv4_interfaces(addrs: &[InterfaceAddr], capacity: usize) -> Vec<NetInterface> {
    addrs
        .iter()
        .filter_map(|a| match a.address {
            Some(IpAddr::V4(ipv4)) => Some(NetInterface {
                name: bounded_name(&a.name),
                ipv4,
            }),
            _ => None,
        })
        .take(capacity)
        .collect()
}

pub struct NetIfSampler {
    source: Box<dyn InterfaceSource>,
    capacity: usize,
}

impl NetIfSampler {
    pub fn new(source: Box<dyn InterfaceSource>, capacity: usize) -> Self {
        Self { source, capacity }
    }
}

impl Sampler for NetIfSampler {
    const NAME: &'static str = "netif";
    type Output = Vec<NetInterface>;

    fn sample(&mut self) -> Result<Vec<NetInterface>, SampleError> {
        let addrs = self.source.enumerate()?;
        Ok(ipv4_interfaces(&addrs, self.capacity))
    }

    // Replaced wholesale, never merged with the previous list.
    fn apply(interfaces: Vec<NetInterface>, snapshot: &mut Snapshot) {
        snapshot.interfaces = interfaces;
    }
}
