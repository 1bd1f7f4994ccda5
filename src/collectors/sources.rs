use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

pub trait LineSource: Send {
    fn read_line(&mut self) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMemInfo {
    pub total_ram: u64,
    pub free_ram: u64,
    pub shared_ram: u64,
    pub buffer_ram: u64,
    pub total_swap: u64,
    pub free_swap: u64,
    pub total_high: u64,
    pub free_high: u64,
    pub mem_unit: u32,
    pub procs: u64,
    pub uptime_secs: i64,
}

pub trait MemorySource: Send {
    fn query(&mut self) -> io::Result<RawMemInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub address: Option<IpAddr>,
}

pub trait InterfaceSource: Send {
    fn enumerate(&mut self) -> io::Result<Vec<InterfaceAddr>>;
}

#[derive(Debug, Clone)]
pub struct FirstLine {
    path: PathBuf,
}

impl FirstLine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LineSource for FirstLine {
    fn read_line(&mut self) -> io::Result<String> {
        let text = fs::read_to_string(&self.path)?;
        text.lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} is empty", self.path.display()),
                )
            })
    }
}

#[cfg(target_os = "linux")]
#[derive(Debug, Default)]
pub struct KernelMemInfo;

#[cfg(target_os = "linux")]
impl MemorySource for KernelMemInfo {
    #[allow(clippy::unnecessary_cast)]
    fn query(&mut self) -> io::Result<RawMemInfo> {
        let mut info = std::mem::MaybeUninit::<libc::sysinfo>::zeroed();
        // SAFETY: `info` is a valid, writable sysinfo struct for the call.
        let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: zero-initialized and filled in by the successful call above.
        let info = unsafe { info.assume_init() };

        Ok(RawMemInfo {
            total_ram: info.totalram as u64,
            free_ram: info.freeram as u64,
            shared_ram: info.sharedram as u64,
            buffer_ram: info.bufferram as u64,
            total_swap: info.totalswap as u64,
            free_swap: info.freeswap as u64,
            total_high: info.totalhigh as u64,
            free_high: info.freehigh as u64,
            mem_unit: info.mem_unit as u32,
            procs: u64::from(info.procs),
            uptime_secs: info.uptime as i64,
        })
    }
}

/// Portable fallback built on the `sysinfo` crate. It has no notion of
/// shared, buffer or high memory, so those stay zero.
#[cfg(not(target_os = "linux"))]
pub struct SysinfoMemInfo {
    system: sysinfo::System,
}

#[cfg(not(target_os = "linux"))]
impl SysinfoMemInfo {
    pub fn new() -> Self {
        use sysinfo::SystemExt;

        Self {
            system: sysinfo::System::new(),
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl MemorySource for SysinfoMemInfo {
    fn query(&mut self) -> io::Result<RawMemInfo> {
        use sysinfo::SystemExt;

        self.system.refresh_memory();
        self.system.refresh_processes();
        Ok(RawMemInfo {
            total_ram: self.system.total_memory(),
            free_ram: self.system.free_memory(),
            total_swap: self.system.total_swap(),
            free_swap: self.system.free_swap(),
            mem_unit: 1,
            procs: self.system.processes().len() as u64,
            uptime_secs: i64::try_from(self.system.uptime()).unwrap_or(i64::MAX),
            ..RawMemInfo::default()
        })
    }
}

pub fn default_memory_source() -> Box<dyn MemorySource> {
    #[cfg(target_os = "linux")]
    {
        Box::new(KernelMemInfo)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Box::new(SysinfoMemInfo::new())
    }
}

#[cfg(unix)]
#[derive(Debug, Default)]
pub struct IfAddrs;

#[cfg(unix)]
impl InterfaceSource for IfAddrs {
    fn enumerate(&mut self) -> io::Result<Vec<InterfaceAddr>> {
        use std::net::{SocketAddrV4, SocketAddrV6};

        let addrs = nix::ifaddrs::getifaddrs().map_err(io::Error::from)?;
        Ok(addrs
            .map(|ifa| {
                let address = ifa.address.as_ref().and_then(|addr| {
                    if let Some(sin) = addr.as_sockaddr_in() {
                        Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
                    } else {
                        addr.as_sockaddr_in6()
                            .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
                    }
                });
                InterfaceAddr {
                    name: ifa.interface_name,
                    address,
                }
            })
            .collect())
    }
}

#[cfg(not(unix))]
#[derive(Debug, Default)]
pub struct IfAddrs;

#[cfg(not(unix))]
impl InterfaceSource for IfAddrs {
    fn enumerate(&mut self) -> io::Result<Vec<InterfaceAddr>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "interface enumeration is only available on unix",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn first_line_reads_only_the_first_line() {
        let path = std::env::temp_dir().join(format!("hostmine-firstline-{}", std::process::id()));
        {
            let mut f = fs::File::create(&path).unwrap();
            writeln!(f, "cpu  1 2 3 4 5").unwrap();
            writeln!(f, "cpu0 1 1 1 1 1").unwrap();
        }
        let mut source = FirstLine::new(&path);
        assert_eq!(source.read_line().unwrap(), "cpu  1 2 3 4 5");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn first_line_of_missing_file_is_error() {
        let mut source = FirstLine::new("/nonexistent/hostmine/stat");
        assert!(source.read_line().is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn kernel_meminfo_reports_nonzero_unit() {
        let info = KernelMemInfo.query().unwrap();
        assert!(info.mem_unit >= 1);
        assert!(info.total_ram > 0);
    }
}
